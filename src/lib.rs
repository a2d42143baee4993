//! ProcWarden - process supervision and recovery core
//!
//! This crate provides the building blocks of a self-healing process
//! supervisor:
//! - OS-level child process lifecycle management
//! - Freeze detection via per-unit watchdog timers
//! - Crash recovery with backoff and circuit-breaking
//! - Consolidated health aggregation (heartbeats, HTTP probes, system resources)
//! - Dependency-ordered start/stop sequencing
//! - Durable checkpoints in SQLite with WAL mode
//! - Hot reload of unit descriptors with rollback on failure

pub mod checkpoint;
pub mod core;
pub mod db;
pub mod health;
pub mod logging;
pub mod orchestrator;
pub mod recovery;
pub mod reload;
pub mod supervisor;
pub mod watchdog;

// Re-export commonly used items
pub use crate::checkpoint::{Checkpoint, CheckpointStore};
pub use crate::core::config::{AppConfig, ServiceSpec};
pub use crate::core::error::{Result, WardenError};
pub use crate::db::{create_database_pool, DatabaseConfig};
pub use crate::health::{HealthAggregator, HealthRecord, HealthStatus};
pub use crate::orchestrator::DependencyOrchestrator;
pub use crate::recovery::{CrashRecoveryEngine, RecoveryStrategy};
pub use crate::reload::HotReloadCoordinator;
pub use crate::supervisor::{PollStatus, ProcessSupervisor, UnitState};
pub use crate::watchdog::{FreezeLevel, Watchdog};
