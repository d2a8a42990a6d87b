//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;

/// Lifecycle status of a tracked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Stored, not yet dispositioned.
    Pending,
    /// Dropped by a rule (automated sender, bulk mail).
    Ignored,
    /// Reply generated and delivered.
    AutoReplied,
    /// Waiting for a human.
    Escalated,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ignored => "ignored",
            Self::AutoReplied => "auto_replied",
            Self::Escalated => "escalated",
        }
    }

    /// Parse a status string from the DB. Unknown values read as pending
    /// so the message is picked up again.
    pub fn from_db(s: &str) -> Self {
        match s {
            "ignored" => Self::Ignored,
            "auto_replied" => Self::AutoReplied,
            "escalated" => Self::Escalated,
            _ => Self::Pending,
        }
    }
}

/// Fields for a new inbound message row.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub external_id: &'a str,
    pub channel: &'a str,
    pub sender: &'a str,
    pub sender_name: Option<&'a str>,
    pub subject: &'a str,
    pub content: &'a str,
    pub received_at: DateTime<Utc>,
    /// Channel-specific JSON needed to deliver a reply.
    pub reply_metadata: Option<&'a str>,
}

/// A persisted inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub external_id: String,
    pub channel: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(skip)]
    pub reply_metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted triage result for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageRecord {
    pub message_id: String,
    pub category: String,
    pub complexity: u8,
    pub keywords: Vec<String>,
    pub response: Option<String>,
    pub needs_human: bool,
    /// Why the message went to a human, if it did.
    pub escalation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One LLM usage entry (aggregated over the calls of a triage).
#[derive(Debug, Clone)]
pub struct LlmUsageRecord<'a> {
    pub message_id: Option<&'a str>,
    pub model: &'a str,
    pub calls: u32,
    pub failed_calls: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
}

/// Aggregated LLM spend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmCostSummary {
    pub total_cost: Decimal,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub call_count: u64,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a new inbound message. Returns the generated UUID string.
    ///
    /// Fails with `DatabaseError::Constraint` when the external id is
    /// already stored.
    async fn insert_message(&self, message: &NewMessage<'_>) -> Result<String, DatabaseError>;

    /// Look up a message by its internal ID.
    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, DatabaseError>;

    /// Look up a message by its external (channel-native) ID.
    async fn get_message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredMessage>, DatabaseError>;

    /// Get all pending messages, oldest first.
    async fn get_pending_messages(&self) -> Result<Vec<StoredMessage>, DatabaseError>;

    /// Update a message's status.
    async fn update_message_status(
        &self,
        id: &str,
        status: MessageStatus,
    ) -> Result<(), DatabaseError>;

    /// Get messages with a given status, most recent first.
    async fn get_messages_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError>;

    // ── Triage ──────────────────────────────────────────────────────

    /// Store the triage result for a message, replacing any earlier one.
    async fn insert_triage_record(&self, record: &TriageRecord) -> Result<(), DatabaseError>;

    /// Get the triage result for a message.
    async fn get_triage_record(
        &self,
        message_id: &str,
    ) -> Result<Option<TriageRecord>, DatabaseError>;

    // ── LLM usage ───────────────────────────────────────────────────

    /// Record token usage and cost.
    async fn record_llm_usage(&self, record: &LlmUsageRecord<'_>) -> Result<Uuid, DatabaseError>;

    /// Total spend across all recorded usage.
    async fn get_total_spend(&self) -> Result<LlmCostSummary, DatabaseError>;
}
