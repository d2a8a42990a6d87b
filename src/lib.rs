//! Support Triage: LLM-assisted triage for customer support messages.

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod triage;
