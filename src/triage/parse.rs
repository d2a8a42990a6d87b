//! Post-processing of raw model output for each triage call.
//!
//! Every parser returns `None` when the output is unusable; the engine
//! substitutes the fallback value.

use std::sync::LazyLock;

use regex::Regex;

use crate::triage::types::{Complexity, MAX_KEYWORDS};

/// Leading list markers: "-", "*", "1.", "2)".
static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").expect("static regex")
});

/// First signed integer in an answer.
static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("static regex"));

/// Quote characters stripped from both ends of a keyword.
const KEYWORD_QUOTES: &[char] = &['"', '\'', '`'];

/// Characters stripped from both ends of a category answer.
const CATEGORY_TRIM: &[char] = &['"', '\'', '`', '*', '.', ' ', '\n', '\t', '\r'];

/// Clean a category answer.
///
/// Only the first line is used; models sometimes append an explanation.
pub fn parse_category(raw: &str) -> Option<String> {
    let first_line = raw.trim().lines().next().unwrap_or("");
    let first_line = first_line
        .strip_prefix("Categoria:")
        .unwrap_or(first_line);
    let cleaned = first_line.trim_matches(CATEGORY_TRIM);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Split a comma-separated keyword answer into at most `MAX_KEYWORDS` items.
///
/// Returns an empty list (not `None`) when the model answered with nothing
/// usable; an empty keyword list is a valid outcome.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(|k| {
            LIST_MARKER
                .replace(k, "")
                .trim()
                .trim_matches(KEYWORD_QUOTES)
                .trim()
                .to_string()
        })
        .filter(|k| !k.is_empty())
        .take(MAX_KEYWORDS)
        .collect()
}

/// Parse the first integer in the answer as a complexity score.
///
/// Out-of-range integers are rejected rather than clamped.
pub fn parse_complexity(raw: &str) -> Option<Complexity> {
    let value: i64 = INTEGER.find(raw)?.as_str().parse().ok()?;
    Complexity::new(u8::try_from(value).ok()?)
}

/// Clean a generated reply.
pub fn parse_reply(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```")
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_trims_quotes_and_period() {
        assert_eq!(parse_category("  \"Financeiro\".\n").as_deref(), Some("Financeiro"));
    }

    #[test]
    fn category_uses_first_line_only() {
        assert_eq!(
            parse_category("Suporte Técnico\nA mensagem trata de login.").as_deref(),
            Some("Suporte Técnico")
        );
    }

    #[test]
    fn category_strips_label_prefix() {
        assert_eq!(parse_category("Categoria: Comercial").as_deref(), Some("Comercial"));
    }

    #[test]
    fn empty_category_is_none() {
        assert!(parse_category("   ").is_none());
        assert!(parse_category("\"\"").is_none());
    }

    #[test]
    fn keywords_split_and_trimmed() {
        assert_eq!(
            parse_keywords(" fatura , cobrança duplicada,, cartão "),
            vec!["fatura", "cobrança duplicada", "cartão"]
        );
    }

    #[test]
    fn keywords_capped_at_five() {
        let kws = parse_keywords("a, b, c, d, e, f, g");
        assert_eq!(kws.len(), 5);
        assert_eq!(kws[4], "e");
    }

    #[test]
    fn keywords_accept_list_formatting() {
        assert_eq!(parse_keywords("1. senha\n2. login"), vec!["senha", "login"]);
    }

    #[test]
    fn keywords_keep_leading_digits_that_are_not_markers() {
        assert_eq!(parse_keywords("2fa, 4g"), vec!["2fa", "4g"]);
    }

    #[test]
    fn keywords_keep_inner_punctuation() {
        assert_eq!(
            parse_keywords("\".NET\", 'C#', node.js, `API`"),
            vec![".NET", "C#", "node.js", "API"]
        );
    }

    #[test]
    fn keywords_empty_answer_is_empty_list() {
        assert!(parse_keywords("").is_empty());
        assert!(parse_keywords(" , , ").is_empty());
    }

    #[test]
    fn complexity_parses_bare_number() {
        assert_eq!(parse_complexity("4").map(Complexity::value), Some(4));
    }

    #[test]
    fn complexity_parses_number_in_sentence() {
        assert_eq!(
            parse_complexity("Complexidade: 2 (simples)").map(Complexity::value),
            Some(2)
        );
    }

    #[test]
    fn complexity_rejects_out_of_range() {
        assert!(parse_complexity("0").is_none());
        assert!(parse_complexity("7").is_none());
        assert!(parse_complexity("10").is_none());
    }

    #[test]
    fn complexity_keeps_the_sign() {
        assert!(parse_complexity("-1").is_none());
        assert!(parse_complexity("Nota: -3").is_none());
        assert!(parse_complexity("99999999999999999999").is_none());
    }

    #[test]
    fn complexity_rejects_missing_number() {
        assert!(parse_complexity("alta").is_none());
        assert!(parse_complexity("").is_none());
    }

    #[test]
    fn reply_trimmed_and_unfenced() {
        assert_eq!(parse_reply("  Olá!  ").as_deref(), Some("Olá!"));
        assert_eq!(parse_reply("```\nOlá!\n```").as_deref(), Some("Olá!"));
        assert!(parse_reply("\n \n").is_none());
    }
}
