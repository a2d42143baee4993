//! Error types for ProcWarden
//!
//! Centralized error taxonomy with category/severity classification and
//! crash-dump artifacts for fatal failures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::checkpoint::CheckpointError;
use crate::core::config::ConfigError;
use crate::health::HealthError;
use crate::orchestrator::OrchestratorError;
use crate::recovery::RecoveryError;
use crate::reload::ReloadError;
use crate::supervisor::SupervisorError;
use crate::watchdog::WatchdogError;

/// Result type alias for ProcWarden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Main error type for ProcWarden
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),

    #[error("Health error: {0}")]
    Health(#[from] HealthError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Reload error: {0}")]
    Reload(#[from] ReloadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure category, assigned by pattern matching on the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Database,
    Api,
    Filesystem,
    Configuration,
    Security,
    Unknown,
}

/// Failure severity. Fatal errors are never auto-recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Warning,
    Recoverable,
    Fatal,
}

/// A classified failure, suitable for persistence and crash dumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Correlation id (time-ordered)
    pub id: Uuid,
    /// Assigned category
    pub category: ErrorCategory,
    /// Assigned severity
    pub severity: ErrorSeverity,
    /// Human-readable message
    pub message: String,
    /// Arbitrary context (unit name, exit code, operation, ...)
    pub context: BTreeMap<String, String>,
    /// When the failure was observed
    pub timestamp: DateTime<Utc>,
    /// Backtrace or stack text, when available
    pub trace: Option<String>,
}

impl ErrorRecord {
    /// Classify an arbitrary error message into a record.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let category = categorize(&message);
        let severity = assess_severity(category, &message);
        Self {
            id: Uuid::now_v7(),
            category,
            severity,
            message,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
            trace: None,
        }
    }

    /// Classify a concrete error value.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        let mut record = Self::classify(err.to_string());
        // Walk the source chain into the trace field
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(inner) = source {
            chain.push(inner.to_string());
            source = inner.source();
        }
        if !chain.is_empty() {
            record.trace = Some(chain.join("\ncaused by: "));
        }
        record
    }

    /// Attach a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Force a severity (e.g. synthetic frozen failures are Recoverable).
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether automatic recovery may be attempted for this record.
    pub fn is_recoverable(&self) -> bool {
        self.severity != ErrorSeverity::Fatal
    }
}

/// Categorize an error message by keyword matching.
///
/// Security patterns are checked before network ones so that
/// "authentication timed out" lands in Security, which maps to Fatal.
pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();

    if contains_any(
        &lower,
        &["auth", "credential", "token", "certificate", "forbidden", "unauthorized"],
    ) {
        return ErrorCategory::Security;
    }
    if contains_any(&lower, &["config", "invalid value", "missing field", "parse"]) {
        return ErrorCategory::Configuration;
    }
    if contains_any(
        &lower,
        &["connection", "timeout", "timed out", "dns", "unreachable", "refused", "socket"],
    ) {
        return ErrorCategory::Network;
    }
    if contains_any(&lower, &["sql", "database", "transaction", "constraint", "migration"]) {
        return ErrorCategory::Database;
    }
    if contains_any(&lower, &["api", "status code", "rate limit", "bad gateway", "http"]) {
        return ErrorCategory::Api;
    }
    if contains_any(
        &lower,
        &["no such file", "not found", "permission denied", "file", "directory", "disk"],
    ) {
        return ErrorCategory::Filesystem;
    }

    ErrorCategory::Unknown
}

/// Assign a severity given a category and the original message.
pub fn assess_severity(category: ErrorCategory, message: &str) -> ErrorSeverity {
    let lower = message.to_lowercase();

    // Process-fatal signals are fatal regardless of category
    if contains_any(&lower, &["sigsegv", "sigabrt", "sigbus", "panicked", "out of memory"]) {
        return ErrorSeverity::Fatal;
    }

    match category {
        ErrorCategory::Security | ErrorCategory::Configuration => ErrorSeverity::Fatal,
        ErrorCategory::Network | ErrorCategory::Api => ErrorSeverity::Recoverable,
        ErrorCategory::Database | ErrorCategory::Filesystem | ErrorCategory::Unknown => {
            ErrorSeverity::Warning
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Writes one structured crash-dump artifact per fatal error.
///
/// Dumps are plain JSON files in a dedicated directory, consumable by
/// external log/alerting tooling.
#[derive(Debug, Clone)]
pub struct CrashDumpWriter {
    dump_dir: PathBuf,
}

impl CrashDumpWriter {
    /// Create a writer rooted at the given directory.
    pub fn new(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
        }
    }

    /// Default dump directory under the platform data dir.
    pub fn default_dir() -> PathBuf {
        directories::ProjectDirs::from("com", "procwarden", "ProcWarden")
            .map(|dirs| dirs.data_local_dir().join("crash_dumps"))
            .unwrap_or_else(|| PathBuf::from("crash_dumps"))
    }

    /// Directory dumps are written to.
    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    /// Write a crash dump for the record, returning the artifact path.
    ///
    /// Intended for Fatal records; callers may dump lower severities too,
    /// e.g. when a recovery attempt itself fails.
    pub async fn write(&self, record: &ErrorRecord) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dump_dir).await?;

        let filename = format!(
            "crash_{}_{}.json",
            record.timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            record.id
        );
        let path = self.dump_dir.join(filename);
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| WardenError::Internal(format!("crash dump serialization: {e}")))?;
        tokio::fs::write(&path, body).await?;

        tracing::error!(
            category = ?record.category,
            dump = %path.display(),
            "Fatal error recorded: {}",
            record.message
        );
        Ok(path)
    }
}
