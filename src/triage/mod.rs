//! Message triage.
//!
//! Classifies a support message (category, keywords, complexity) and either
//! drafts a reply or flags it for a human.

mod engine;
mod parse;
pub mod prompts;
mod types;

pub use engine::{TriageConfig, TriageEngine};
pub use types::{
    Complexity, ESCALATION_THRESHOLD, FALLBACK_CATEGORY, MAX_KEYWORDS, TriageCall, TriageOutcome,
    TriageRequest, TriageUsage,
};
