//! Managed unit state
//!
//! A `ManagedUnit` tracks one supervised OS process: its descriptor,
//! lifecycle state, child handle, and restart bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Child;

use crate::core::config::ServiceSpec;

/// Lifecycle state of a managed unit.
///
/// `Uninitialized → Starting → Running → {Stopping → Stopped | Crashed | Failed}`,
/// with `Crashed`/`Stopped` able to transition back to `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// Registered, never started
    Uninitialized,
    /// Spawn in progress
    Starting,
    /// Process is alive
    Running,
    /// Graceful stop in progress
    Stopping,
    /// Stopped deliberately
    Stopped,
    /// Exited while it was expected to be running
    Crashed,
    /// Spawn failed; operator intervention required
    Failed,
}

impl UnitState {
    /// States in which the unit owns a live process (PID must be set).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// States from which `start` may spawn a fresh process.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Stopped | Self::Crashed | Self::Failed)
    }
}

/// One supervised process.
pub struct ManagedUnit {
    /// Service descriptor the unit was registered with
    pub spec: ServiceSpec,
    /// Current lifecycle state
    pub state: UnitState,
    /// Live child handle while active
    pub child: Option<Child>,
    /// OS process id; Some iff `state.is_active()`
    pub pid: Option<u32>,
    /// Times the unit has been restarted (by recovery or explicitly)
    pub restart_count: u32,
    /// Timestamp of the most recent successful spawn
    pub started_at: Option<DateTime<Utc>>,
    /// Exit code from the most recent exit (None when killed by signal)
    pub last_exit_code: Option<i32>,
}

impl ManagedUnit {
    /// Create a unit in `Uninitialized` state.
    pub fn new(spec: ServiceSpec) -> Self {
        Self {
            spec,
            state: UnitState::Uninitialized,
            child: None,
            pid: None,
            restart_count: 0,
            started_at: None,
            last_exit_code: None,
        }
    }

    /// Point-in-time status snapshot for reporting.
    pub fn status(&self) -> UnitStatus {
        UnitStatus {
            name: self.spec.name.clone(),
            state: self.state,
            pid: self.pid,
            restart_count: self.restart_count,
            started_at: self.started_at,
            last_exit_code: self.last_exit_code,
        }
    }
}

impl std::fmt::Debug for ManagedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedUnit")
            .field("name", &self.spec.name)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("restart_count", &self.restart_count)
            .finish()
    }
}

/// Serializable unit status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub state: UnitState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
}
