//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, LlmCostSummary, LlmUsageRecord, MessageStatus, NewMessage, StoredMessage,
    TriageRecord,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_messages(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            messages.push(
                row_to_message(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(messages)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to a StoredMessage.
fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, libsql::Error> {
    let received_str: String = row.get(7)?;
    let status_str: String = row.get(8)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    Ok(StoredMessage {
        id: row.get(0)?,
        external_id: row.get(1)?,
        channel: row.get(2)?,
        sender: row.get(3)?,
        sender_name: row.get(4).ok(),
        subject: row.get(5)?,
        content: row.get(6)?,
        received_at: parse_datetime(&received_str),
        status: MessageStatus::from_db(&status_str),
        reply_metadata: row.get(9).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a TriageRecord.
fn row_to_triage_record(row: &libsql::Row) -> Result<TriageRecord, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let keywords_json: String = row.get(3).map_err(get_err)?;
    let keywords: Vec<String> = serde_json::from_str(&keywords_json)
        .map_err(|e| DatabaseError::Serialization(format!("keywords: {e}")))?;
    let complexity: i64 = row.get(2).map_err(get_err)?;
    let needs_human: i64 = row.get(5).map_err(get_err)?;
    let created_str: String = row.get(7).map_err(get_err)?;

    Ok(TriageRecord {
        message_id: row.get(0).map_err(get_err)?,
        category: row.get(1).map_err(get_err)?,
        complexity: u8::try_from(complexity).unwrap_or(0),
        keywords,
        response: row.get(4).ok(),
        needs_human: needs_human != 0,
        escalation_reason: row.get(6).ok(),
        created_at: parse_datetime(&created_str),
    })
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map an insert error, surfacing unique-key violations as constraint errors.
fn insert_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

// ── Trait implementation ────────────────────────────────────────────

const MESSAGE_COLUMNS: &str = "id, external_id, channel, sender, sender_name, subject, content, received_at, status, reply_metadata, created_at, updated_at";

const TRIAGE_COLUMNS: &str =
    "message_id, category, complexity, keywords, response, needs_human, escalation_reason, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage<'_>) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO messages (id, external_id, channel, sender, sender_name, subject,
                    content, received_at, status, reply_metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10, ?10)",
                params![
                    id.clone(),
                    message.external_id,
                    message.channel,
                    message.sender,
                    opt_text(message.sender_name),
                    message.subject,
                    message.content,
                    message.received_at.to_rfc3339(),
                    opt_text(message.reply_metadata),
                    now,
                ],
            )
            .await
            .map_err(|e| insert_error("insert_message", e))?;

        debug!(id = %id, external_id = message.external_id, "Message inserted into DB");
        Ok(id)
    }

    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, DatabaseError> {
        let mut found = self
            .query_messages(
                "get_message",
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await?;
        Ok(found.pop())
    }

    async fn get_message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredMessage>, DatabaseError> {
        let mut found = self
            .query_messages(
                "get_message_by_external_id",
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE external_id = ?1"),
                params![external_id],
            )
            .await?;
        Ok(found.pop())
    }

    async fn get_pending_messages(&self) -> Result<Vec<StoredMessage>, DatabaseError> {
        self.query_messages(
            "get_pending_messages",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = 'pending' ORDER BY received_at ASC"
            ),
            (),
        )
        .await
    }

    async fn update_message_status(
        &self,
        id: &str,
        status: MessageStatus,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_message_status: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".to_string(),
                id: id.to_string(),
            });
        }

        debug!(id = id, status = status.as_str(), "Message status updated");
        Ok(())
    }

    async fn get_messages_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        self.query_messages(
            "get_messages_by_status",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = ?1 ORDER BY received_at DESC LIMIT ?2"
            ),
            params![status.as_str(), limit as i64],
        )
        .await
    }

    // ── Triage ──────────────────────────────────────────────────────

    async fn insert_triage_record(&self, record: &TriageRecord) -> Result<(), DatabaseError> {
        let keywords = serde_json::to_string(&record.keywords)
            .map_err(|e| DatabaseError::Serialization(format!("keywords: {e}")))?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO triage_records (message_id, category, complexity, keywords,
                    response, needs_human, escalation_reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.message_id.as_str(),
                    record.category.as_str(),
                    record.complexity as i64,
                    keywords,
                    opt_text(record.response.as_deref()),
                    record.needs_human as i64,
                    opt_text(record.escalation_reason.as_deref()),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| insert_error("insert_triage_record", e))?;

        Ok(())
    }

    async fn get_triage_record(
        &self,
        message_id: &str,
    ) -> Result<Option<TriageRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TRIAGE_COLUMNS} FROM triage_records WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_triage_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_triage_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_triage_record: {e}"))),
        }
    }

    // ── LLM usage ───────────────────────────────────────────────────

    async fn record_llm_usage(&self, record: &LlmUsageRecord<'_>) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO llm_usage (id, message_id, model, calls, failed_calls, input_tokens,
                    output_tokens, cost, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.to_string(),
                    opt_text(record.message_id),
                    record.model,
                    record.calls as i64,
                    record.failed_calls as i64,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                    record.cost.to_string(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_llm_usage: {e}")))?;

        Ok(id)
    }

    async fn get_total_spend(&self) -> Result<LlmCostSummary, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT TOTAL(CAST(cost AS REAL)), TOTAL(input_tokens), TOTAL(output_tokens), TOTAL(calls) FROM llm_usage",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_total_spend: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                // TOTAL() always returns a float in SQLite/libsql
                let cost: f64 = row.get(0).unwrap_or(0.0);
                let input_tokens: f64 = row.get(1).unwrap_or(0.0);
                let output_tokens: f64 = row.get(2).unwrap_or(0.0);
                let calls: f64 = row.get(3).unwrap_or(0.0);

                Ok(LlmCostSummary {
                    total_cost: Decimal::from_str(&format!("{cost:.10}"))
                        .unwrap_or(Decimal::ZERO)
                        .normalize(),
                    total_input_tokens: input_tokens as u64,
                    total_output_tokens: output_tokens as u64,
                    call_count: calls as u64,
                })
            }
            Ok(None) => Ok(LlmCostSummary::default()),
            Err(e) => Err(DatabaseError::Query(format!("get_total_spend: {e}"))),
        }
    }
}
