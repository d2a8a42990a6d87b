//! Request/outcome types for the triage pipeline.
//!
//! Field names on the wire keep the public contract of the support API
//! (`assunto`, `corpo`, `categoria`, ...).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Score at or above which a message is escalated to a human.
pub const ESCALATION_THRESHOLD: u8 = 4;

/// Maximum number of keywords kept per message.
pub const MAX_KEYWORDS: usize = 5;

/// Category used when classification fails.
pub const FALLBACK_CATEGORY: &str = "Geral";

/// Inbound text to triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRequest {
    /// Subject line.
    #[serde(rename = "assunto", default)]
    pub subject: String,
    /// Message body.
    #[serde(rename = "corpo", default)]
    pub body: String,
    /// Display name of the sender, used to personalise replies.
    #[serde(
        rename = "nomeRemetente",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_name: Option<String>,
}

impl TriageRequest {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            sender_name: None,
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// True when there is nothing to classify.
    pub fn is_blank(&self) -> bool {
        self.subject.trim().is_empty() && self.body.trim().is_empty()
    }
}

/// Complexity score in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Complexity(u8);

impl Complexity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Score used when the model's answer is missing or out of range.
    pub const FALLBACK: Complexity = Complexity(3);

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether this score crosses the escalation threshold.
    pub fn requires_human(self) -> bool {
        self.0 >= ESCALATION_THRESHOLD
    }
}

impl TryFrom<u8> for Complexity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("complexity {value} outside 1..=5"))
    }
}

impl From<Complexity> for u8 {
    fn from(c: Complexity) -> Self {
        c.0
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of triaging one message.
///
/// `needs_human` and `response` are tied together: an escalated outcome
/// never carries a reply. Build outcomes through [`TriageOutcome::escalated`]
/// and [`TriageOutcome::answered`] to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageOutcome {
    #[serde(rename = "categoria")]
    pub category: String,
    #[serde(rename = "complexidade")]
    pub complexity: Complexity,
    #[serde(rename = "palavrasChave")]
    pub keywords: Vec<String>,
    #[serde(rename = "resposta")]
    pub response: Option<String>,
    #[serde(rename = "precisaIntervencaoHumana")]
    pub needs_human: bool,
}

impl TriageOutcome {
    pub fn escalated(category: String, complexity: Complexity, keywords: Vec<String>) -> Self {
        Self {
            category,
            complexity,
            keywords,
            response: None,
            needs_human: true,
        }
    }

    pub fn answered(
        category: String,
        complexity: Complexity,
        keywords: Vec<String>,
        response: String,
    ) -> Self {
        Self {
            category,
            complexity,
            keywords,
            response: Some(response),
            needs_human: false,
        }
    }
}

/// Which of the four triage calls a usage entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageCall {
    Categorize,
    Keywords,
    Complexity,
    Reply,
}

impl TriageCall {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Categorize => "categorize",
            Self::Keywords => "keywords",
            Self::Complexity => "complexity",
            Self::Reply => "reply",
        }
    }
}

/// Token/cost accounting for one triage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageUsage {
    pub calls: u32,
    pub failed_calls: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
}

impl TriageUsage {
    pub fn record(&mut self, input_tokens: u32, output_tokens: u32, cost: Decimal) {
        self.calls += 1;
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        self.cost += cost;
    }

    pub fn record_failure(&mut self) {
        self.calls += 1;
        self.failed_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_bounds() {
        assert!(Complexity::new(0).is_none());
        assert!(Complexity::new(6).is_none());
        assert_eq!(Complexity::new(1).unwrap().value(), 1);
        assert_eq!(Complexity::new(5).unwrap().value(), 5);
    }

    #[test]
    fn threshold_is_four() {
        assert!(!Complexity::new(3).unwrap().requires_human());
        assert!(Complexity::new(4).unwrap().requires_human());
        assert!(Complexity::new(5).unwrap().requires_human());
    }

    #[test]
    fn request_accepts_wire_names() {
        let req: TriageRequest = serde_json::from_str(
            r#"{"assunto": "Fatura", "corpo": "Cobrança duplicada", "nomeRemetente": "Ana"}"#,
        )
        .unwrap();
        assert_eq!(req.subject, "Fatura");
        assert_eq!(req.body, "Cobrança duplicada");
        assert_eq!(req.sender_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn request_sender_name_is_optional() {
        let req: TriageRequest =
            serde_json::from_str(r#"{"assunto": "Oi", "corpo": "Tudo bem?"}"#).unwrap();
        assert!(req.sender_name.is_none());
        assert!(!req.is_blank());
        assert!(TriageRequest::new(" ", "\n").is_blank());
    }

    #[test]
    fn outcome_serializes_wire_names() {
        let outcome = TriageOutcome::answered(
            "Financeiro".into(),
            Complexity::new(2).unwrap(),
            vec!["fatura".into()],
            "Olá!".into(),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["categoria"], "Financeiro");
        assert_eq!(json["complexidade"], 2);
        assert_eq!(json["palavrasChave"][0], "fatura");
        assert_eq!(json["resposta"], "Olá!");
        assert_eq!(json["precisaIntervencaoHumana"], false);
    }

    #[test]
    fn escalated_outcome_serializes_null_reply() {
        let outcome =
            TriageOutcome::escalated("Geral".into(), Complexity::new(5).unwrap(), vec![]);
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json["resposta"].is_null());
        assert_eq!(json["precisaIntervencaoHumana"], true);
    }

    #[test]
    fn complexity_rejects_out_of_range_on_deserialize() {
        let raw = r#"{"categoria":"Geral","complexidade":9,"palavrasChave":[],"resposta":null,"precisaIntervencaoHumana":true}"#;
        assert!(serde_json::from_str::<TriageOutcome>(raw).is_err());
    }

    #[test]
    fn usage_accumulates() {
        let mut usage = TriageUsage::default();
        usage.record(10, 5, Decimal::ONE);
        usage.record_failure();
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.failed_calls, 1);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.cost, Decimal::ONE);
    }
}
