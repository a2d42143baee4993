//! Core functionality for ProcWarden
//!
//! Error taxonomy, retry helpers, and configuration types shared by
//! every other module.

pub mod config;
pub mod error;
pub mod retry;

pub use config::{AppConfig, ConfigError, ServiceSpec};
pub use error::{
    assess_severity, categorize, CrashDumpWriter, ErrorCategory, ErrorRecord, ErrorSeverity,
    Result, WardenError,
};
pub use retry::{retry_with_backoff, RetryPolicy};
