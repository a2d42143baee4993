//! Database module for ProcWarden
//!
//! Provides SQLite connectivity with WAL mode for the checkpoint store.
//! Single writer (the recovery/reload paths), many readers.

use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::core::error::Result;

/// SQLite connection pool configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file path
    pub db_path: PathBuf,

    /// Maximum number of connections
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    pub connect_timeout_secs: u64,

    /// Whether to enable WAL mode
    pub enable_wal: bool,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_path: directories::ProjectDirs::from("com", "procwarden", "ProcWarden")
                .map(|dirs| dirs.data_local_dir().join("checkpoints.db"))
                .unwrap_or_else(|| PathBuf::from("checkpoints.db")),
            max_connections: 4,
            connect_timeout_secs: 30,
            enable_wal: true,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    /// Create a new DatabaseConfig with the specified path
    pub fn with_path(db_path: PathBuf) -> Self {
        Self {
            db_path,
            ..Default::default()
        }
    }

    /// Set WAL mode
    pub fn with_wal(mut self, enable: bool) -> Self {
        self.enable_wal = enable;
        self
    }
}

/// Create a SQLite connection pool with the given configuration.
///
/// WAL mode allows the monitoring loops to read recovery history while
/// a checkpoint write is in flight.
///
/// # Errors
///
/// Returns an error if the database cannot be created or connected to
pub async fn create_database_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = config.db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(&config.db_path)
        .create_if_missing(true)
        .journal_mode(if config.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms as u64))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(connect_options)
        .await?;

    tracing::info!(
        "Database pool created: {:?} (WAL: {}, connections: {})",
        config.db_path,
        config.enable_wal,
        config.max_connections
    );

    Ok(pool)
}
