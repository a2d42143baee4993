//! Crash Recovery Engine Module
//!
//! Reacts to process exits and freezes with a per-unit strategy:
//! plain restart, restart with exponential backoff, or circuit-broken
//! restart. Failures are counted over a sliding time window; too many
//! inside the window trips the circuit and recovery is refused until a
//! cool-down elapses (checked lazily on the next attempt).
//!
//! A successful restart resets the unit's retry counter but never its
//! crash-history window. The asymmetry is deliberate: one brief
//! recovery must not reset a flapping unit's circuit-breaker
//! eligibility.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::core::config::RecoveryConfig;
use crate::core::error::{CrashDumpWriter, ErrorRecord, ErrorSeverity};
use crate::supervisor::{ProcessSupervisor, SupervisorError};

/// Recovery errors
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Recovery result type
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Per-unit recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Restore the latest checkpoint (best-effort) and restart
    Restart,
    /// Like Restart, with exponential backoff and a retry cap
    RestartWithBackoff,
    /// Like Restart, but only while the circuit is closed
    CircuitBreaker,
    /// Never recover automatically
    None,
}

impl RecoveryStrategy {
    fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::RestartWithBackoff => "backoff_restart",
            Self::CircuitBreaker => "circuit_breaker",
            Self::None => "none",
        }
    }
}

/// Why a `handle_failure` call ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    /// Unit restarted successfully
    Restarted,
    /// Circuit is open; no recovery attempted by policy
    CircuitOpen,
    /// Backoff retry cap reached; gave up
    MaxRetriesExceeded,
    /// Fatal-severity failure; automatic recovery is never attempted
    FatalNotRecovered,
    /// Strategy is None; nothing to do
    StrategyNone,
    /// Restart was attempted and failed
    StartFailed,
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub reason: RecoveryReason,
    /// When the circuit is open: time until it may close
    pub retry_after: Option<Duration>,
}

impl RecoveryOutcome {
    fn recovered() -> Self {
        Self {
            recovered: true,
            reason: RecoveryReason::Restarted,
            retry_after: None,
        }
    }

    fn refused(reason: RecoveryReason) -> Self {
        Self {
            recovered: false,
            reason,
            retry_after: None,
        }
    }
}

#[derive(Debug, Default)]
struct UnitRecoveryState {
    strategy: Option<RecoveryStrategy>,
    retry_count: u32,
    crash_history: Vec<Instant>,
    circuit_opened_at: Option<Instant>,
}

/// Outcome of the circuit bookkeeping, resolved under the state lock so
/// logging and restarts can happen without it.
enum CircuitDecision {
    Refused { retry_after: Duration },
    Tripped { failures: usize },
    Proceed { strategy: RecoveryStrategy, retry_count: u32 },
}

/// Drives restarts of crashed or frozen units through the supervisor.
pub struct CrashRecoveryEngine {
    supervisor: Arc<ProcessSupervisor>,
    /// Checkpoint store; recovery works without one (no restore, no log)
    store: Option<Arc<CheckpointStore>>,
    dumps: CrashDumpWriter,
    config: RecoveryConfig,
    state: RwLock<HashMap<String, UnitRecoveryState>>,
}

impl CrashRecoveryEngine {
    /// Create an engine over the given supervisor.
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        store: Option<Arc<CheckpointStore>>,
        dumps: CrashDumpWriter,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            supervisor,
            store,
            dumps,
            config,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Register an explicit strategy for a unit.
    ///
    /// Units without one derive a default from their descriptor:
    /// `RestartWithBackoff` when auto-restart is set, otherwise `None`.
    pub async fn register_strategy(&self, name: impl Into<String>, strategy: RecoveryStrategy) {
        let mut state = self.state.write().await;
        state.entry(name.into()).or_default().strategy = Some(strategy);
    }

    /// Handle one failure of a unit.
    ///
    /// `exit_code` comes from `poll` when the process exited; `record`
    /// carries classification context (synthetic frozen failures, probe
    /// errors). Fatal-severity records are crash-dumped and never
    /// recovered.
    pub async fn handle_failure(
        &self,
        name: &str,
        exit_code: Option<i32>,
        record: Option<ErrorRecord>,
    ) -> RecoveryResult<RecoveryOutcome> {
        let record = record.unwrap_or_else(|| {
            ErrorRecord::classify(format!("unit '{name}' exited with code {exit_code:?}"))
                .with_severity(ErrorSeverity::Recoverable)
                .with_context("unit", name)
        });

        if !record.is_recoverable() {
            if let Err(e) = self.dumps.write(&record).await {
                tracing::error!(unit = %name, "Crash dump write failed: {}", e);
            }
            self.log(RecoveryStrategy::None, "skipped_fatal", &record.message).await;
            return Ok(RecoveryOutcome::refused(RecoveryReason::FatalNotRecovered));
        }

        let spec = self.supervisor.spec(name).await?;
        let window = Duration::from_secs(self.config.circuit_window_secs);
        let cool_down = Duration::from_secs(self.config.circuit_timeout_secs);

        // Circuit bookkeeping under the lock; logging and restart
        // attempts outside it
        let decision = {
            let mut state = self.state.write().await;
            let unit = state.entry(name.to_string()).or_default();
            let now = Instant::now();

            let mut still_open = None;
            if let Some(opened_at) = unit.circuit_opened_at {
                let since = now.duration_since(opened_at);
                if since < cool_down {
                    still_open = Some(cool_down - since);
                } else {
                    // Cool-down elapsed: close the circuit with a clean window
                    tracing::info!(unit = %name, "Circuit cool-down elapsed, closing");
                    unit.circuit_opened_at = None;
                    unit.crash_history.clear();
                }
            }

            if let Some(retry_after) = still_open {
                CircuitDecision::Refused { retry_after }
            } else {
                unit.crash_history.retain(|t| now.duration_since(*t) < window);
                if unit.crash_history.len() as u32 >= self.config.circuit_threshold {
                    unit.circuit_opened_at = Some(now);
                    CircuitDecision::Tripped {
                        failures: unit.crash_history.len(),
                    }
                } else {
                    unit.crash_history.push(now);
                    let strategy = unit.strategy.unwrap_or(if spec.auto_restart {
                        RecoveryStrategy::RestartWithBackoff
                    } else {
                        RecoveryStrategy::None
                    });
                    CircuitDecision::Proceed {
                        strategy,
                        retry_count: unit.retry_count,
                    }
                }
            }
        };

        let (strategy, retry_count) = match decision {
            CircuitDecision::Refused { retry_after } => {
                tracing::warn!(unit = %name, ?retry_after, "Circuit open, refusing recovery");
                self.log(RecoveryStrategy::CircuitBreaker, "circuit_open", &record.message)
                    .await;
                return Ok(RecoveryOutcome {
                    recovered: false,
                    reason: RecoveryReason::CircuitOpen,
                    retry_after: Some(retry_after),
                });
            }
            CircuitDecision::Tripped { failures } => {
                tracing::error!(
                    unit = %name,
                    failures,
                    window_secs = self.config.circuit_window_secs,
                    "Failure threshold reached, opening circuit"
                );
                self.log(RecoveryStrategy::CircuitBreaker, "circuit_open", &record.message)
                    .await;
                return Ok(RecoveryOutcome {
                    recovered: false,
                    reason: RecoveryReason::CircuitOpen,
                    retry_after: Some(cool_down),
                });
            }
            CircuitDecision::Proceed {
                strategy,
                retry_count,
            } => (strategy, retry_count),
        };

        match strategy {
            RecoveryStrategy::None => {
                tracing::info!(unit = %name, "No recovery strategy, leaving unit down");
                self.log(strategy, "skipped", &record.message).await;
                Ok(RecoveryOutcome::refused(RecoveryReason::StrategyNone))
            }
            RecoveryStrategy::Restart | RecoveryStrategy::CircuitBreaker => {
                self.attempt_restart(name, strategy).await
            }
            RecoveryStrategy::RestartWithBackoff => {
                if retry_count >= spec.max_restarts {
                    tracing::error!(
                        unit = %name,
                        retries = retry_count,
                        "Max restart retries exceeded, giving up"
                    );
                    self.log(strategy, "max_retries_exceeded", &record.message).await;
                    return Ok(RecoveryOutcome::refused(RecoveryReason::MaxRetriesExceeded));
                }

                let delay =
                    Duration::from_secs_f64(spec.restart_backoff_base.powi(retry_count as i32));
                tracing::info!(unit = %name, ?delay, retry = retry_count, "Backoff before restart");
                // Blocks only this recovery path, not the monitoring loops
                tokio::time::sleep(delay).await;

                {
                    let mut state = self.state.write().await;
                    state.entry(name.to_string()).or_default().retry_count += 1;
                }
                self.attempt_restart(name, strategy).await
            }
        }
    }

    /// Save a checkpoint for a unit (no-op without a store).
    pub async fn save_checkpoint(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> RecoveryResult<()> {
        if let Some(store) = &self.store {
            store
                .save(name, payload, serde_json::json!({"source": "recovery"}))
                .await?;
        }
        Ok(())
    }

    /// Current retry counter for a unit.
    pub async fn retry_count(&self, name: &str) -> u32 {
        let state = self.state.read().await;
        state.get(name).map(|u| u.retry_count).unwrap_or(0)
    }

    /// Failures currently inside the circuit window for a unit.
    pub async fn failures_in_window(&self, name: &str) -> usize {
        let window = Duration::from_secs(self.config.circuit_window_secs);
        let now = Instant::now();
        let state = self.state.read().await;
        state
            .get(name)
            .map(|u| {
                u.crash_history
                    .iter()
                    .filter(|t| now.duration_since(**t) < window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether the unit's circuit is currently open.
    pub async fn circuit_open(&self, name: &str) -> bool {
        let state = self.state.read().await;
        state
            .get(name)
            .map(|u| u.circuit_opened_at.is_some())
            .unwrap_or(false)
    }

    async fn attempt_restart(
        &self,
        name: &str,
        strategy: RecoveryStrategy,
    ) -> RecoveryResult<RecoveryOutcome> {
        self.restore_checkpoint(name).await;

        match self.supervisor.restart(name).await {
            Ok(pid) => {
                tracing::info!(unit = %name, pid, "Unit recovered");
                let mut state = self.state.write().await;
                if let Some(unit) = state.get_mut(name) {
                    // Retry counter resets on success; the crash-history
                    // window does not
                    unit.retry_count = 0;
                }
                drop(state);
                self.log(strategy, "success", &format!("unit '{name}' restarted, pid {pid}"))
                    .await;
                Ok(RecoveryOutcome::recovered())
            }
            Err(e) => {
                tracing::error!(unit = %name, "Recovery restart failed: {}", e);
                self.log(strategy, "failed", &e.to_string()).await;
                Ok(RecoveryOutcome::refused(RecoveryReason::StartFailed))
            }
        }
    }

    /// Best-effort restore of the newest checkpoint; absence is fine.
    pub async fn restore_checkpoint(&self, name: &str) -> Option<Checkpoint> {
        let store = self.store.as_ref()?;
        match store.restore(name, None).await {
            Ok(checkpoint) => {
                tracing::debug!(
                    unit = %name,
                    taken_at = %checkpoint.created_at,
                    "Checkpoint restored for recovery"
                );
                Some(checkpoint)
            }
            Err(CheckpointError::NotFound(_)) => None,
            Err(e) => {
                tracing::warn!(unit = %name, "Checkpoint restore failed: {}", e);
                None
            }
        }
    }

    /// Best-effort recovery-log append.
    async fn log(&self, strategy: RecoveryStrategy, status: &str, details: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.log_recovery(strategy.as_str(), status, details).await {
                tracing::warn!("Recovery log write failed: {}", e);
            }
        }
    }
}
