//! Per-token pricing for known models (USD).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Fallback pricing for models missing from the table.
const DEFAULT_COST: (Decimal, Decimal) = (dec!(0.000003), dec!(0.000015));

/// Return (input, output) cost per token for a model.
///
/// Matches by prefix so dated snapshots (`gpt-4o-2024-08-06`) resolve to
/// their family price.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let model = model.to_lowercase();
    // Longest prefixes first: "gpt-4o-mini" must win over "gpt-4o".
    let table: &[(&str, Decimal, Decimal)] = &[
        ("gpt-4o-mini", dec!(0.00000015), dec!(0.0000006)),
        ("gpt-4o", dec!(0.0000025), dec!(0.00001)),
        ("gpt-4.1-mini", dec!(0.0000004), dec!(0.0000016)),
        ("gpt-4.1", dec!(0.000002), dec!(0.000008)),
        ("gpt-3.5-turbo", dec!(0.0000005), dec!(0.0000015)),
        ("claude-3-5-haiku", dec!(0.0000008), dec!(0.000004)),
        ("claude-haiku", dec!(0.000001), dec!(0.000005)),
        ("claude-sonnet", dec!(0.000003), dec!(0.000015)),
        ("claude-3-5-sonnet", dec!(0.000003), dec!(0.000015)),
        ("claude-opus", dec!(0.000015), dec!(0.000075)),
    ];

    table
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_COST)
}

/// Cost of a single call given (input, output) per-token rates.
pub fn call_cost(rates: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    let (input, output) = rates;
    input * Decimal::from(input_tokens) + output * Decimal::from(output_tokens)
}
