//! Checkpoint Store Module
//!
//! Durable, key-scoped state snapshots with bounded history, plus the
//! recovery log. Both tables are append-only: rows are inserted and
//! pruned, never mutated in place, so the single-writer/many-reader
//! discipline holds without extra locking.

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

/// Checkpoint store errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No checkpoint found for key: {0}")]
    NotFound(String),
}

/// Checkpoint result type
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// A durable snapshot of a unit's recoverable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unit / state-type key
    pub key: String,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
    /// Opaque serialized application state
    pub payload: serde_json::Value,
    /// Free-form metadata (reason, source, ...)
    pub metadata: serde_json::Value,
}

/// One recovery-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryLogEntry {
    pub created_at: DateTime<Utc>,
    pub recovery_type: String,
    pub status: String,
    pub details: String,
}

/// SQLite-backed checkpoint store with per-key retention.
pub struct CheckpointStore {
    pool: SqlitePool,
    retention: u32,
}

impl CheckpointStore {
    /// Default checkpoints retained per key.
    pub const DEFAULT_RETENTION: u32 = 10;

    /// Create the store on an existing pool, bootstrapping its tables.
    pub async fn new(pool: SqlitePool, retention: u32) -> CheckpointResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkpoints_key ON checkpoints(key, id)")
            .execute(&pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recovery_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                recovery_type TEXT NOT NULL,
                status TEXT NOT NULL,
                details TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            retention: retention.max(1),
        })
    }

    /// Append a checkpoint for `key`, pruning history beyond retention.
    pub async fn save(
        &self,
        key: &str,
        payload: serde_json::Value,
        metadata: serde_json::Value,
    ) -> CheckpointResult<Checkpoint> {
        let created_at = Utc::now();
        sqlx::query("INSERT INTO checkpoints (key, created_at, payload, metadata) VALUES (?, ?, ?, ?)")
            .bind(key)
            .bind(created_at.to_rfc3339())
            .bind(payload.to_string())
            .bind(metadata.to_string())
            .execute(&self.pool)
            .await?;

        // Drop the oldest rows past the retention limit for this key
        sqlx::query(
            r#"
            DELETE FROM checkpoints
            WHERE key = ?1 AND id NOT IN (
                SELECT id FROM checkpoints WHERE key = ?1 ORDER BY id DESC LIMIT ?2
            )
            "#,
        )
        .bind(key)
        .bind(self.retention)
        .execute(&self.pool)
        .await?;

        tracing::debug!(key, "Checkpoint saved");
        Ok(Checkpoint {
            key: key.to_string(),
            created_at,
            payload,
            metadata,
        })
    }

    /// Restore the newest checkpoint for `key`, or the one taken at the
    /// given timestamp.
    pub async fn restore(
        &self,
        key: &str,
        at: Option<DateTime<Utc>>,
    ) -> CheckpointResult<Checkpoint> {
        let row = match at {
            Some(ts) => {
                sqlx::query(
                    "SELECT key, created_at, payload, metadata FROM checkpoints \
                     WHERE key = ? AND created_at = ? ORDER BY id DESC LIMIT 1",
                )
                .bind(key)
                .bind(ts.to_rfc3339())
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT key, created_at, payload, metadata FROM checkpoints \
                     WHERE key = ? ORDER BY id DESC LIMIT 1",
                )
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(row_to_checkpoint)
            .transpose()?
            .ok_or_else(|| CheckpointError::NotFound(key.to_string()))
    }

    /// Recent checkpoints for `key`, newest first.
    pub async fn history(&self, key: &str, limit: u32) -> CheckpointResult<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT key, created_at, payload, metadata FROM checkpoints \
             WHERE key = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_checkpoint).collect()
    }

    /// Append a recovery-log entry.
    pub async fn log_recovery(
        &self,
        recovery_type: &str,
        status: &str,
        details: &str,
    ) -> CheckpointResult<()> {
        sqlx::query(
            "INSERT INTO recovery_log (created_at, recovery_type, status, details) VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(recovery_type)
        .bind(status)
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recent recovery-log entries, newest first.
    pub async fn recent_recoveries(&self, limit: u32) -> CheckpointResult<Vec<RecoveryLogEntry>> {
        let rows = sqlx::query(
            "SELECT created_at, recovery_type, status, details FROM recovery_log \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let created_at: String = row.try_get("created_at")?;
                Ok(RecoveryLogEntry {
                    created_at: parse_timestamp(&created_at),
                    recovery_type: row.try_get("recovery_type")?,
                    status: row.try_get("status")?,
                    details: row.try_get("details")?,
                })
            })
            .collect()
    }
}

fn row_to_checkpoint(row: sqlx::sqlite::SqliteRow) -> CheckpointResult<Checkpoint> {
    let key: String = row.try_get("key")?;
    let created_at: String = row.try_get("created_at")?;
    let payload: String = row.try_get("payload")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(Checkpoint {
        key,
        created_at: parse_timestamp(&created_at),
        payload: serde_json::from_str(&payload)?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
