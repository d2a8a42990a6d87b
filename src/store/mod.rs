//! Persistence layer: SQLite-backed storage for messages, triage results
//! and LLM usage.

pub mod libsql_backend;
mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, LlmCostSummary, LlmUsageRecord, MessageStatus, NewMessage, StoredMessage,
    TriageRecord,
};
