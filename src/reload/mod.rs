//! Hot Reload Module
//!
//! Applies configuration changes to running units without a
//! full-system restart. Before swapping a unit's descriptor the
//! coordinator snapshots the old one into the checkpoint store; if the
//! restart under the new descriptor fails, it rolls back to the
//! snapshot and restarts again.
//!
//! Rollback is best-effort, not transactional: a unit whose old
//! descriptor also fails to start is left stopped and the error is
//! reported rather than hidden.
//!
//! Change detection is modification-time polling over each unit's
//! declared reload paths. Deleted paths count as changed once.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, RwLock};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::core::config::ServiceSpec;
use crate::supervisor::{ProcessSupervisor, SupervisorError};

/// Hot-reload errors
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Reload of '{unit}' failed and rollback failed too: {reason}")]
    RollbackFailed { unit: String, reason: String },
}

/// Reload result type
pub type ReloadResult<T> = Result<T, ReloadError>;

/// What a reload call actually did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadOutcome {
    pub unit: String,
    /// The unit runs under the new descriptor
    pub reloaded: bool,
    /// The new descriptor failed and the old one was restored
    pub rolled_back: bool,
}

/// Coordinates descriptor swaps and change polling.
pub struct HotReloadCoordinator {
    supervisor: Arc<ProcessSupervisor>,
    store: Arc<CheckpointStore>,
    /// Unit name -> last-known mtimes of its reload paths
    tracked: RwLock<HashMap<String, HashMap<PathBuf, Option<SystemTime>>>>,
}

impl HotReloadCoordinator {
    pub fn new(supervisor: Arc<ProcessSupervisor>, store: Arc<CheckpointStore>) -> Self {
        Self {
            supervisor,
            store,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking a unit's reload paths at their current mtimes.
    pub async fn track(&self, name: &str) -> ReloadResult<()> {
        let spec = self.supervisor.spec(name).await?;
        let mut mtimes = HashMap::new();
        for path in &spec.reload_paths {
            mtimes.insert(path.clone(), mtime_of(path).await);
        }
        let mut tracked = self.tracked.write().await;
        tracked.insert(name.to_string(), mtimes);
        Ok(())
    }

    /// Compare tracked mtimes against the filesystem.
    ///
    /// Returns the units whose paths changed since the last call, and
    /// advances the stored mtimes so a change is reported once.
    pub async fn check_for_changes(&self) -> Vec<String> {
        let mut changed = Vec::new();
        let mut tracked = self.tracked.write().await;
        for (name, mtimes) in tracked.iter_mut() {
            let mut unit_changed = false;
            for (path, known) in mtimes.iter_mut() {
                let current = mtime_of(path).await;
                if current != *known {
                    unit_changed = true;
                    *known = current;
                }
            }
            if unit_changed {
                changed.push(name.clone());
            }
        }
        changed.sort();
        changed
    }

    /// Swap a unit onto a new descriptor (or re-apply its current one)
    /// and restart it.
    ///
    /// With `preserve_state` the old descriptor is snapshotted first so
    /// a failed swap can roll back; without it a failed swap leaves the
    /// unit stopped under the new descriptor.
    pub async fn reload(
        &self,
        name: &str,
        new_spec: Option<ServiceSpec>,
        preserve_state: bool,
    ) -> ReloadResult<ReloadOutcome> {
        let old_spec = self.supervisor.spec(name).await?;

        if preserve_state {
            self.store
                .save(
                    name,
                    serde_json::to_value(&old_spec).map_err(CheckpointError::Serialization)?,
                    serde_json::json!({"source": "reload"}),
                )
                .await?;
        }

        if let Some(spec) = new_spec {
            self.supervisor.update_spec(name, spec).await?;
        }

        match self.supervisor.restart(name).await {
            Ok(pid) => {
                tracing::info!(unit = %name, pid, "Unit reloaded");
                // Fresh baseline so the swap itself is not re-detected
                let _ = self.track(name).await;
                Ok(ReloadOutcome {
                    unit: name.to_string(),
                    reloaded: true,
                    rolled_back: false,
                })
            }
            Err(e) if preserve_state => {
                tracing::warn!(unit = %name, "Reload failed, rolling back: {}", e);
                self.supervisor.update_spec(name, old_spec).await?;
                match self.supervisor.restart(name).await {
                    Ok(pid) => {
                        tracing::info!(unit = %name, pid, "Rolled back to previous descriptor");
                        Ok(ReloadOutcome {
                            unit: name.to_string(),
                            reloaded: false,
                            rolled_back: true,
                        })
                    }
                    Err(rollback_err) => Err(ReloadError::RollbackFailed {
                        unit: name.to_string(),
                        reason: format!("reload: {e}; rollback: {rollback_err}"),
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Spawn the periodic change-polling loop; changed units are
    /// reloaded in place under their current descriptor.
    pub fn spawn_poll_loop(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for unit in self.check_for_changes().await {
                            tracing::info!(unit = %unit, "Tracked path changed, reloading");
                            if let Err(e) = self.reload(&unit, None, true).await {
                                tracing::error!(unit = %unit, "Reload failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("Reload poll loop stopping");
                        break;
                    }
                }
            }
        })
    }
}

async fn mtime_of(path: &PathBuf) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
}
