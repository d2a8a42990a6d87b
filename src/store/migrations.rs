//! Version-tracked database migrations for the libSQL backend.
//!
//! Migrations are numbered and append-only. The applied versions live in
//! `_migrations`; opening a database brings it up to the latest one.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                channel TEXT NOT NULL,
                sender TEXT NOT NULL,
                sender_name TEXT,
                subject TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                received_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reply_metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status);
            CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel);

            CREATE TABLE IF NOT EXISTS triage_records (
                message_id TEXT PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
                category TEXT NOT NULL,
                complexity INTEGER NOT NULL,
                keywords TEXT NOT NULL DEFAULT '[]',
                response TEXT,
                needs_human INTEGER NOT NULL,
                escalation_reason TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_triage_records_category ON triage_records(category);
        "#,
    },
    Migration {
        version: 2,
        name: "llm_usage_tracking",
        sql: r#"
            CREATE TABLE IF NOT EXISTS llm_usage (
                id TEXT PRIMARY KEY,
                message_id TEXT,
                model TEXT NOT NULL,
                calls INTEGER NOT NULL DEFAULT 0,
                failed_calls INTEGER NOT NULL DEFAULT 0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_llm_usage_message ON llm_usage(message_id);
            CREATE INDEX IF NOT EXISTS idx_llm_usage_created ON llm_usage(created_at);
        "#,
    },
];

/// Apply every migration newer than the recorded schema version.
///
/// Each step runs in its own transaction together with its `_migrations`
/// row, so a failed step leaves the schema at the previous version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let from = schema_version(conn).await?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > from);

    for migration in pending {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        apply(conn, migration).await.map_err(|e| {
            DatabaseError::Migration(format!(
                "Migration V{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
    }

    let to = schema_version(conn).await?;
    tracing::debug!(from, to, "Database migrations complete");
    Ok(())
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), libsql::Error> {
    let tx = conn.transaction().await?;
    tx.execute_batch(migration.sql).await?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![migration.version, migration.name],
    )
    .await?;
    tx.commit().await
}

/// Highest applied migration version, or 0 on a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query schema version: {e}")))?;

    let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read schema version: {e}")))?
    else {
        return Ok(0);
    };
    row.get(0)
        .map_err(|e| DatabaseError::Migration(format!("Failed to parse schema version: {e}")))
}
