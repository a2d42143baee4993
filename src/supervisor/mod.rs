//! Process Supervisor Module
//!
//! Owns the registry of managed units and their OS child processes:
//! register, start, stop, restart, poll exit status, and ordered
//! shutdown. All registry mutation goes through this type so that a
//! health-triggered restart and a watchdog-triggered restart of the
//! same unit cannot race.
//!
//! Crash detection is polling-based (`poll`), not signal-based: the
//! supervisor owns a queryable child handle, not a SIGCHLD reaper.

mod unit;

pub use unit::{ManagedUnit, UnitState, UnitStatus};

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

use crate::core::config::ServiceSpec;

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Unit already registered: {0}")]
    DuplicateUnit(String),

    #[error("Unit not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("Failed to stop '{name}': {reason}")]
    StopFailed { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supervisor result type
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Outcome of a non-blocking `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Process still alive, or the unit holds no process
    Alive,
    /// Process exited; the code is None for signal deaths
    Exited(Option<i32>),
}

/// Owns and drives the managed-unit registry.
pub struct ProcessSupervisor {
    /// Unit registry; the single synchronized access point
    units: RwLock<HashMap<String, ManagedUnit>>,
    /// Realized start order, for reverse-order shutdown
    start_order: RwLock<Vec<String>>,
    /// Default graceful-stop timeout
    stop_timeout: Duration,
}

impl ProcessSupervisor {
    /// Create an empty supervisor.
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            start_order: RwLock::new(Vec::new()),
            stop_timeout,
        }
    }

    /// Register a unit in `Uninitialized` state.
    pub async fn register(&self, spec: ServiceSpec) -> SupervisorResult<()> {
        let mut units = self.units.write().await;
        if units.contains_key(&spec.name) {
            return Err(SupervisorError::DuplicateUnit(spec.name));
        }
        let name = spec.name.clone();
        units.insert(name.clone(), ManagedUnit::new(spec));
        tracing::debug!(unit = %name, "Unit registered");
        Ok(())
    }

    /// Start a unit's process.
    ///
    /// No-op success when the unit is already `Running`. Spawn failure
    /// leaves the unit in `Failed` and is reported, not retried here;
    /// retry policy belongs to the recovery engine.
    pub async fn start(&self, name: &str) -> SupervisorResult<u32> {
        let mut units = self.units.write().await;
        let unit = units
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

        match unit.state {
            UnitState::Running => {
                // Already running; report the live pid
                return Ok(unit.pid.unwrap_or_default());
            }
            UnitState::Starting | UnitState::Stopping => {
                return Err(SupervisorError::SpawnFailed {
                    name: name.to_string(),
                    reason: format!("unit is {:?}", unit.state),
                });
            }
            _ => {}
        }

        unit.state = UnitState::Starting;
        match spawn_unit(&unit.spec) {
            Ok(child) => {
                let pid = child.id().unwrap_or_default();
                unit.child = Some(child);
                unit.pid = Some(pid);
                unit.state = UnitState::Running;
                unit.started_at = Some(Utc::now());
                tracing::info!(unit = %name, pid, "Unit started");

                let mut order = self.start_order.write().await;
                if !order.contains(&name.to_string()) {
                    order.push(name.to_string());
                }
                Ok(pid)
            }
            Err(e) => {
                unit.state = UnitState::Failed;
                unit.pid = None;
                tracing::error!(unit = %name, "Spawn failed: {}", e);
                Err(SupervisorError::SpawnFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Replace a unit's descriptor. Takes effect on the next start;
    /// a live process keeps running under the old one until then.
    pub async fn update_spec(&self, name: &str, spec: ServiceSpec) -> SupervisorResult<()> {
        let mut units = self.units.write().await;
        let unit = units
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        unit.spec = spec;
        Ok(())
    }

    /// Stop a unit gracefully, escalating to SIGKILL after `timeout`.
    ///
    /// Always ends in `Stopped`; the exit code is captured on whichever
    /// path the process took. Returns the exit code when the OS reports
    /// one (signal deaths report `None`).
    pub async fn stop(&self, name: &str, timeout: Duration) -> SupervisorResult<Option<i32>> {
        // Take the child out under the lock, then wait without holding it
        let (child, pid) = {
            let mut units = self.units.write().await;
            let unit = units
                .get_mut(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

            if !unit.state.is_active() {
                return Ok(unit.last_exit_code);
            }
            unit.state = UnitState::Stopping;
            (unit.child.take(), unit.pid)
        };

        let exit_code = match child {
            Some(child) => match wait_or_kill(name, child, pid, timeout).await {
                Ok(code) => code,
                Err(e) => {
                    // The handle is consumed either way; a terminal state
                    // keeps the unit restartable instead of parked in
                    // Stopping
                    let mut units = self.units.write().await;
                    if let Some(unit) = units.get_mut(name) {
                        unit.state = UnitState::Failed;
                        unit.pid = None;
                    }
                    return Err(e);
                }
            },
            None => {
                // Active state without a handle: another stop raced us
                tracing::warn!(unit = %name, "Stop requested but no child handle held");
                None
            }
        };

        let mut units = self.units.write().await;
        if let Some(unit) = units.get_mut(name) {
            unit.state = UnitState::Stopped;
            unit.pid = None;
            unit.last_exit_code = exit_code;
        }
        tracing::info!(unit = %name, ?exit_code, "Unit stopped");
        Ok(exit_code)
    }

    /// Stop then start a unit, incrementing its restart counter.
    pub async fn restart(&self, name: &str) -> SupervisorResult<u32> {
        self.stop(name, self.stop_timeout).await?;
        let pid = self.start(name).await?;
        let mut units = self.units.write().await;
        if let Some(unit) = units.get_mut(name) {
            unit.restart_count += 1;
        }
        Ok(pid)
    }

    /// Non-blocking exit check.
    ///
    /// If the process exited while the unit was `Running`, the unit
    /// transitions to `Crashed` and the exit code is returned so the
    /// caller can drive recovery.
    pub async fn poll(&self, name: &str) -> SupervisorResult<PollStatus> {
        let mut units = self.units.write().await;
        let unit = units
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

        let Some(child) = unit.child.as_mut() else {
            return Ok(PollStatus::Alive);
        };

        match child.try_wait()? {
            Some(status) => {
                let exit_code = status.code();
                unit.child = None;
                unit.pid = None;
                unit.last_exit_code = exit_code;
                if unit.state == UnitState::Running {
                    unit.state = UnitState::Crashed;
                    tracing::warn!(unit = %name, ?exit_code, "Unit crashed");
                }
                Ok(PollStatus::Exited(exit_code))
            }
            None => Ok(PollStatus::Alive),
        }
    }

    /// Stop every unit in the reverse of the realized start order.
    ///
    /// The overall timeout is split evenly across units; units that do
    /// not stop within their share are force-killed, never left hanging.
    pub async fn shutdown_all(&self, timeout: Duration) -> SupervisorResult<()> {
        let order: Vec<String> = {
            let order = self.start_order.read().await;
            order.iter().rev().cloned().collect()
        };
        if order.is_empty() {
            return Ok(());
        }

        let per_unit = timeout / order.len() as u32;
        let mut first_error = None;
        for name in &order {
            if let Err(e) = self.stop(name, per_unit).await {
                tracing::error!(unit = %name, "Shutdown stop failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Current state of a unit.
    pub async fn state(&self, name: &str) -> SupervisorResult<UnitState> {
        let units = self.units.read().await;
        units
            .get(name)
            .map(|u| u.state)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    /// Whether a unit is currently `Running`.
    pub async fn is_running(&self, name: &str) -> bool {
        matches!(self.state(name).await, Ok(UnitState::Running))
    }

    /// Live PID of a unit, when active.
    pub async fn pid(&self, name: &str) -> SupervisorResult<Option<u32>> {
        let units = self.units.read().await;
        units
            .get(name)
            .map(|u| u.pid)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    /// Restart counter of a unit.
    pub async fn restart_count(&self, name: &str) -> SupervisorResult<u32> {
        let units = self.units.read().await;
        units
            .get(name)
            .map(|u| u.restart_count)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    /// Registered unit names.
    pub async fn unit_names(&self) -> Vec<String> {
        let units = self.units.read().await;
        units.keys().cloned().collect()
    }

    /// Service spec for a unit.
    pub async fn spec(&self, name: &str) -> SupervisorResult<ServiceSpec> {
        let units = self.units.read().await;
        units
            .get(name)
            .map(|u| u.spec.clone())
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    /// Status snapshots for every registered unit.
    pub async fn statuses(&self) -> Vec<UnitStatus> {
        let units = self.units.read().await;
        units.values().map(|u| u.status()).collect()
    }

    /// Realized start order (units that started successfully, in order).
    pub async fn realized_start_order(&self) -> Vec<String> {
        self.start_order.read().await.clone()
    }
}

/// Spawn a unit's process from its argv descriptor.
///
/// The command is an argv list, never a shell string; stdio is detached
/// so supervised output cannot block the supervisor.
fn spawn_unit(spec: &ServiceSpec) -> std::io::Result<Child> {
    let (program, args) = spec
        .command
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    command.spawn()
}

/// Graceful-termination signal, then force-kill after the timeout.
async fn wait_or_kill(
    name: &str,
    mut child: Child,
    pid: Option<u32>,
    timeout: Duration,
) -> SupervisorResult<Option<i32>> {
    terminate(pid);

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(status.code()),
        Ok(Err(e)) => Err(SupervisorError::StopFailed {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => {
            tracing::warn!(unit = %name, "Graceful stop timed out, force-killing");
            child.start_kill().map_err(|e| SupervisorError::StopFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            let status = child.wait().await.map_err(|e| SupervisorError::StopFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            Ok(status.code())
        }
    }
}

/// Deliver SIGTERM to the process on Unix; no-op elsewhere (the caller
/// escalates to a hard kill after the timeout either way).
#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(pid, "SIGTERM delivery failed: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}
