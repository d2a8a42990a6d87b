//! Pre-LLM rules engine for fast pattern matching.
//!
//! Runs before triage to short-circuit obvious cases:
//! - noreply/no-reply senders → Ignore
//! - mailer-daemon/postmaster bounces → Ignore
//! - unsubscribe subjects and footers → Ignore
//! - legal threats, consumer-protection complaints, chargebacks → Escalate
//!
//! `Ignore` skips triage entirely. `Escalate` still triages the message
//! (category and keywords are useful to the agent who picks it up) but
//! suppresses the auto-reply.

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::InboundMessage;

/// Which field a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum RuleField {
    Sender,
    Subject,
    Content,
    /// Subject or content.
    Text,
}

/// A single rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Compiled regex for matching.
    pub regex: Regex,
    /// Which message field to match.
    pub field: RuleField,
    /// Why this rule triggers.
    pub reason: String,
}

impl Rule {
    fn matches(&self, message: &InboundMessage) -> bool {
        match self.field {
            RuleField::Sender => self.regex.is_match(&message.sender),
            RuleField::Subject => {
                !message.subject.is_empty() && self.regex.is_match(&message.subject)
            }
            RuleField::Content => self.regex.is_match(&message.content),
            RuleField::Text => {
                self.regex.is_match(&message.subject) || self.regex.is_match(&message.content)
            }
        }
    }
}

/// Outcome of a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleVerdict {
    /// Drop the message without triage or reply.
    Ignore { reason: String },
    /// Triage, but always hand to a human.
    Escalate { reason: String },
}

/// Pre-LLM rules engine.
pub struct RulesEngine {
    ignore_rules: Vec<Rule>,
    escalate_rules: Vec<Rule>,
}

impl RulesEngine {
    /// Create a rules engine with default ignore and escalation patterns.
    pub fn default_rules() -> Self {
        let ignore_rules = vec![
            Rule {
                regex: Regex::new(r"(?i)^no[\-_.]?reply@").unwrap(),
                field: RuleField::Sender,
                reason: "noreply sender".into(),
            },
            Rule {
                regex: Regex::new(r"(?i)^(mailer[\-_]?daemon|postmaster)@").unwrap(),
                field: RuleField::Sender,
                reason: "automated mail system".into(),
            },
            Rule {
                regex: Regex::new(r"(?i)\b(unsubscribe|descadastr(ar|e-se))\b").unwrap(),
                field: RuleField::Subject,
                reason: "bulk mail (unsubscribe in subject)".into(),
            },
            Rule {
                regex: Regex::new(
                    r"(?i)(click here to unsubscribe|manage your subscription|para (se )?descadastrar|cancelar (a )?inscri[çc][ãa]o|n[ãa]o deseja mais receber)",
                )
                .unwrap(),
                field: RuleField::Content,
                reason: "bulk mail (unsubscribe footer)".into(),
            },
        ];

        let escalate_rules = vec![
            Rule {
                regex: Regex::new(
                    r"(?i)\b(procon|advogad[oa]s?|processo judicial|a[çc][ãa]o judicial|juizado|reclame aqui)\b",
                )
                .unwrap(),
                field: RuleField::Text,
                reason: "legal or consumer-protection threat".into(),
            },
            Rule {
                regex: Regex::new(r"(?i)\b(chargeback|contesta[çc][ãa]o (da|de) compra)\b").unwrap(),
                field: RuleField::Text,
                reason: "chargeback".into(),
            },
        ];

        Self {
            ignore_rules,
            escalate_rules,
        }
    }

    /// Create an empty rules engine (for testing).
    pub fn empty() -> Self {
        Self {
            ignore_rules: Vec::new(),
            escalate_rules: Vec::new(),
        }
    }

    /// Add a custom ignore rule.
    pub fn add_ignore_rule(
        &mut self,
        pattern: &str,
        field: RuleField,
        reason: &str,
    ) -> Result<(), regex::Error> {
        self.ignore_rules.push(Rule {
            regex: Regex::new(pattern)?,
            field,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Add a pattern (matched against subject and body) that always escalates.
    pub fn add_escalate_pattern(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.escalate_rules.push(Rule {
            regex: Regex::new(pattern)?,
            field: RuleField::Text,
            reason: format!("matched escalation pattern '{pattern}'"),
        });
        Ok(())
    }

    /// Evaluate a message against all rules. Ignore rules win over escalate
    /// rules.
    ///
    /// Returns `None` if no rule matches (plain triage).
    pub fn evaluate(&self, message: &InboundMessage) -> Option<RuleVerdict> {
        if let Some(rule) = self.ignore_rules.iter().find(|r| r.matches(message)) {
            debug!(
                sender = %message.sender,
                reason = %rule.reason,
                "Message matched ignore rule"
            );
            return Some(RuleVerdict::Ignore {
                reason: rule.reason.clone(),
            });
        }

        if let Some(rule) = self.escalate_rules.iter().find(|r| r.matches(message)) {
            debug!(
                sender = %message.sender,
                reason = %rule.reason,
                "Message matched escalation rule"
            );
            return Some(RuleVerdict::Escalate {
                reason: rule.reason.clone(),
            });
        }

        None
    }
}
