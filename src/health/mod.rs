//! Health Aggregation Module
//!
//! Polls per-unit health signals (OS process presence, heartbeat
//! recency, HTTP probes) and system resource usage, and folds them
//! into one consolidated report. Sustained unit failures are handed to
//! the recovery engine; the engine's crash-history window keeps
//! repeated reports for the same outage from double-restarting.

pub mod resources;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use crate::core::config::HealthConfig;
use crate::core::error::{ErrorRecord, ErrorSeverity};
use crate::recovery::CrashRecoveryEngine;
use crate::supervisor::{ProcessSupervisor, SupervisorError, UnitState};

pub use resources::ResourceSnapshot;

/// Health monitoring errors
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("No health entry for unit: {0}")]
    NotRegistered(String),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

/// Health result type
pub type HealthResult<T> = Result<T, HealthError>;

/// Consolidated health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn is_issue(self) -> bool {
        matches!(self, Self::Degraded | Self::Unhealthy)
    }
}

/// Point-in-time health snapshot for one unit (or the system row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub unit: String,
    pub status: HealthStatus,
    pub reason: Option<String>,
    pub consecutive_failures: u32,
    pub checked_at: DateTime<Utc>,
}

/// Full-system report produced by `perform_full_health_check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullHealthReport {
    pub overall: HealthStatus,
    pub units: Vec<HealthRecord>,
    pub resources: ResourceSnapshot,
    pub checked_at: DateTime<Utc>,
}

/// Most recent records kept per unit.
const ROLLING_LOG_CAP: usize = 16;

#[derive(Debug, Default)]
struct HealthEntry {
    last_heartbeat: Option<Instant>,
    consecutive_failures: u32,
    log: VecDeque<HealthRecord>,
}

impl HealthEntry {
    fn push(&mut self, record: HealthRecord) {
        if self.log.len() == ROLLING_LOG_CAP {
            self.log.pop_front();
        }
        self.log.push_back(record);
    }
}

/// Aggregates unit and system health signals.
pub struct HealthAggregator {
    supervisor: Arc<ProcessSupervisor>,
    config: HealthConfig,
    client: reqwest::Client,
    entries: RwLock<HashMap<String, HealthEntry>>,
}

impl HealthAggregator {
    pub fn new(supervisor: Arc<ProcessSupervisor>, config: HealthConfig) -> Self {
        Self {
            supervisor,
            config,
            client: reqwest::Client::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking a unit. Idempotent.
    pub async fn register_process(&self, name: impl Into<String>) {
        let mut entries = self.entries.write().await;
        entries.entry(name.into()).or_default();
    }

    /// Record a liveness signal from the unit itself.
    pub async fn heartbeat(&self, name: &str) -> HealthResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| HealthError::NotRegistered(name.to_string()))?;
        entry.last_heartbeat = Some(Instant::now());
        Ok(())
    }

    /// Evaluate one unit's health.
    ///
    /// Signal precedence: a tracked pid the OS no longer reports wins,
    /// then a stale heartbeat, then the HTTP probe, and absent all
    /// evidence of failure the unit counts as healthy. Degraded and
    /// unhealthy verdicts advance the consecutive-failure counter;
    /// healthy resets it.
    pub async fn check_unit_health(&self, name: &str) -> HealthResult<HealthRecord> {
        {
            let entries = self.entries.read().await;
            if !entries.contains_key(name) {
                return Err(HealthError::NotRegistered(name.to_string()));
            }
        }
        let spec = self.supervisor.spec(name).await?;
        let pid = self.supervisor.pid(name).await?;

        let (status, reason) = self
            .evaluate(name, pid, spec.health_endpoint.as_deref())
            .await;

        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| HealthError::NotRegistered(name.to_string()))?;
        match status {
            HealthStatus::Healthy => entry.consecutive_failures = 0,
            HealthStatus::Degraded | HealthStatus::Unhealthy => entry.consecutive_failures += 1,
            HealthStatus::Unknown => {}
        }
        let record = HealthRecord {
            unit: name.to_string(),
            status,
            reason,
            consecutive_failures: entry.consecutive_failures,
            checked_at: Utc::now(),
        };
        entry.push(record.clone());
        Ok(record)
    }

    async fn evaluate(
        &self,
        name: &str,
        pid: Option<u32>,
        endpoint: Option<&str>,
    ) -> (HealthStatus, Option<String>) {
        if let Some(pid) = pid {
            match tokio::task::spawn_blocking(move || resources::process_alive(pid)).await {
                Ok(false) => {
                    return (
                        HealthStatus::Unhealthy,
                        Some(format!("pid {pid} no longer running")),
                    );
                }
                Ok(true) => {}
                Err(e) => {
                    // Sampling failure is not evidence the unit is down
                    tracing::warn!(unit = %name, "Process check task failed: {}", e);
                }
            }
        }

        let heartbeat = {
            let entries = self.entries.read().await;
            entries.get(name).and_then(|e| e.last_heartbeat)
        };
        if let Some(last) = heartbeat {
            let age = last.elapsed();
            if age > Duration::from_secs(self.config.heartbeat_timeout_secs) {
                return (
                    HealthStatus::Unhealthy,
                    Some(format!("heartbeat stale for {}s", age.as_secs())),
                );
            }
        }

        if let Some(url) = endpoint {
            let timeout = Duration::from_secs(self.config.probe_timeout_secs);
            return match self.client.get(url).timeout(timeout).send().await {
                Ok(resp) if resp.status().is_success() => (HealthStatus::Healthy, None),
                Ok(resp) => (
                    HealthStatus::Degraded,
                    Some(format!("probe returned {}", resp.status())),
                ),
                Err(e) => (
                    HealthStatus::Unhealthy,
                    Some(format!("probe failed: {e}")),
                ),
            };
        }

        (HealthStatus::Healthy, None)
    }

    /// Evaluate system-wide resource usage as one health record.
    pub async fn check_system_resources(&self) -> HealthRecord {
        let snapshot = resources::sample(&self.config).await;
        system_record(&snapshot)
    }

    /// Evaluate every registered unit plus system resources.
    ///
    /// Overall verdict: unhealthy when more than half the units are
    /// unhealthy, degraded when anything at all is off, healthy
    /// otherwise. Currently-unhealthy units that should be running are
    /// handed to the recovery engine when one is given; the engine's
    /// crash-history window rate-limits repeat triggers, so this is
    /// safe to call both from the monitor loop and ad hoc.
    pub async fn perform_full_health_check(
        &self,
        recovery: Option<&CrashRecoveryEngine>,
    ) -> FullHealthReport {
        let mut names: Vec<String> = {
            let entries = self.entries.read().await;
            entries.keys().cloned().collect()
        };
        names.sort();

        let mut units = Vec::with_capacity(names.len());
        for name in &names {
            match self.check_unit_health(name).await {
                Ok(record) => units.push(record),
                Err(e) => tracing::warn!(unit = %name, "Health check failed: {}", e),
            }
        }

        let snapshot = resources::sample(&self.config).await;
        let unhealthy = units
            .iter()
            .filter(|r| r.status == HealthStatus::Unhealthy)
            .count();
        let any_issue = units.iter().any(|r| r.status.is_issue())
            || snapshot.status().is_issue();

        let overall = if !units.is_empty() && unhealthy * 2 > units.len() {
            HealthStatus::Unhealthy
        } else if any_issue {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        if let Some(recovery) = recovery {
            for record in &units {
                if record.status != HealthStatus::Unhealthy {
                    continue;
                }
                if !self.should_recover(&record.unit).await {
                    continue;
                }
                let err = ErrorRecord::classify(format!(
                    "unit '{}' unhealthy: {}",
                    record.unit,
                    record.reason.as_deref().unwrap_or("unknown")
                ))
                .with_severity(ErrorSeverity::Recoverable)
                .with_context("unit", record.unit.clone())
                .with_context("source", "health");

                if let Err(e) = recovery
                    .handle_failure(&record.unit, None, Some(err))
                    .await
                {
                    tracing::error!(unit = %record.unit, "Health-triggered recovery failed: {}", e);
                }
            }
        }

        FullHealthReport {
            overall,
            units,
            resources: snapshot,
            checked_at: Utc::now(),
        }
    }

    /// Most recent record for a unit, if any check has run.
    pub async fn last_record(&self, name: &str) -> Option<HealthRecord> {
        let entries = self.entries.read().await;
        entries.get(name).and_then(|e| e.log.back().cloned())
    }

    /// Bounded rolling log of recent records, oldest first.
    pub async fn history(&self, name: &str) -> Vec<HealthRecord> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|e| e.log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Recovery applies only to units that are supposed to be up.
    async fn should_recover(&self, name: &str) -> bool {
        matches!(
            self.supervisor.state(name).await,
            Ok(UnitState::Running) | Ok(UnitState::Crashed)
        )
    }

    /// Spawn the periodic full-check loop.
    pub fn spawn_monitor_loop(
        self: Arc<Self>,
        recovery: Arc<CrashRecoveryEngine>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.perform_full_health_check(Some(&recovery)).await;
                        if report.overall != HealthStatus::Healthy {
                            tracing::warn!(
                                overall = ?report.overall,
                                breaches = ?report.resources.breaches,
                                "System health degraded"
                            );
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("Health monitor loop stopping");
                        break;
                    }
                }
            }
        })
    }
}

fn system_record(snapshot: &ResourceSnapshot) -> HealthRecord {
    let status = snapshot.status();
    let reason = if snapshot.breaches.is_empty() {
        None
    } else {
        Some(snapshot.breaches.join(", "))
    };
    HealthRecord {
        unit: "system".to_string(),
        status,
        reason,
        consecutive_failures: snapshot.breaches.len() as u32,
        checked_at: Utc::now(),
    }
}
