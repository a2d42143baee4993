//! Watchdog Module (Freeze Detector)
//!
//! Tracks last-activity timestamps per supervised unit and flags units
//! that have gone quiet: Soft freezes are advisory, Hard freezes are
//! actionable. Detection runs on a single periodic scan loop over all
//! registered watchdogs rather than per-unit timers.
//!
//! Registration alone does not arm the freeze clock. A unit is only
//! judged quiet once it has reported activity at least once, so
//! supervised processes that never integrate with the watchdog are
//! never flagged.
//!
//! Deadlock suspicion is a heuristic: three consecutive Hard-freeze
//! observations without an intervening reset. There is no lock-graph
//! analysis behind it; treat it as "this unit has been quiet for far
//! too long", nothing stronger.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use crate::core::config::WatchdogConfig;
use crate::core::error::{ErrorRecord, ErrorSeverity};
use crate::recovery::CrashRecoveryEngine;

/// Watchdog errors
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("No watchdog registered for unit: {0}")]
    NotRegistered(String),
}

/// Freeze classification for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreezeLevel {
    /// Activity seen recently
    None,
    /// Quiet past the soft threshold; flagged, no action taken
    Soft,
    /// Quiet past the hard threshold; recovery-eligible
    Hard,
}

/// Per-unit activity tracker.
#[derive(Debug)]
struct WatchdogEntry {
    soft_threshold: Duration,
    hard_threshold: Duration,
    /// None until the unit reports activity for the first time
    last_activity: Option<Instant>,
    consecutive_hard: u32,
    auto_recover: bool,
}

/// An actionable observation produced by one scan pass.
#[derive(Debug, Clone)]
pub struct FreezeEvent {
    pub unit: String,
    pub level: FreezeLevel,
    pub deadlock_suspected: bool,
    pub auto_recover: bool,
}

/// Freeze detector over all registered units.
pub struct Watchdog {
    config: WatchdogConfig,
    entries: RwLock<HashMap<String, WatchdogEntry>>,
}

impl Watchdog {
    /// Create a watchdog with default thresholds from config.
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a unit using the configured default thresholds.
    pub async fn register(&self, name: impl Into<String>, auto_recover: bool) {
        let soft = Duration::from_secs(self.config.soft_threshold_secs);
        let hard = Duration::from_secs(self.config.hard_threshold_secs);
        self.register_with_thresholds(name, soft, hard, auto_recover).await;
    }

    /// Register a unit with explicit soft/hard thresholds.
    ///
    /// The entry starts disarmed; the freeze clock runs from the first
    /// `reset`/`record_activity` call onwards.
    pub async fn register_with_thresholds(
        &self,
        name: impl Into<String>,
        soft_threshold: Duration,
        hard_threshold: Duration,
        auto_recover: bool,
    ) {
        let name = name.into();
        let mut entries = self.entries.write().await;
        entries.insert(
            name,
            WatchdogEntry {
                soft_threshold,
                hard_threshold,
                last_activity: None,
                consecutive_hard: 0,
                auto_recover,
            },
        );
    }

    /// Remove a unit's watchdog.
    pub async fn unregister(&self, name: &str) {
        self.entries.write().await.remove(name);
    }

    /// Prove liveness: called by the supervised unit itself.
    ///
    /// Resets the activity timestamp and the consecutive-freeze counter,
    /// arming the entry on the first call.
    pub async fn reset(&self, name: &str) -> Result<(), WatchdogError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| WatchdogError::NotRegistered(name.to_string()))?;
        entry.last_activity = Some(Instant::now());
        entry.consecutive_hard = 0;
        Ok(())
    }

    /// Alias for `reset`, used by external probes.
    pub async fn record_activity(&self, name: &str) -> Result<(), WatchdogError> {
        self.reset(name).await
    }

    /// Classify the unit's current freeze level. Read-only.
    pub async fn check(&self, name: &str) -> Result<FreezeLevel, WatchdogError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| WatchdogError::NotRegistered(name.to_string()))?;
        Ok(classify(entry))
    }

    /// Whether the deadlock heuristic has fired for this unit.
    pub async fn deadlock_suspected(&self, name: &str) -> Result<bool, WatchdogError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| WatchdogError::NotRegistered(name.to_string()))?;
        Ok(entry.consecutive_hard >= DEADLOCK_SUSPICION_STRIKES)
    }

    /// One scan pass over every registered watchdog.
    ///
    /// Increments consecutive-Hard counters, logs Soft freezes, and
    /// returns the Hard observations so the caller can drive recovery.
    pub async fn scan_once(&self) -> Vec<FreezeEvent> {
        let mut events = Vec::new();
        let mut entries = self.entries.write().await;

        for (name, entry) in entries.iter_mut() {
            let quiet_for = entry.last_activity.map(|t| t.elapsed()).unwrap_or_default();
            match classify(entry) {
                FreezeLevel::None => {}
                FreezeLevel::Soft => {
                    tracing::warn!(
                        unit = %name,
                        ?quiet_for,
                        "Soft freeze: unit is quiet, leaving it running"
                    );
                }
                FreezeLevel::Hard => {
                    entry.consecutive_hard += 1;
                    let deadlock_suspected = entry.consecutive_hard >= DEADLOCK_SUSPICION_STRIKES;
                    tracing::error!(
                        unit = %name,
                        ?quiet_for,
                        strikes = entry.consecutive_hard,
                        deadlock_suspected,
                        "Hard freeze detected"
                    );
                    events.push(FreezeEvent {
                        unit: name.clone(),
                        level: FreezeLevel::Hard,
                        deadlock_suspected,
                        auto_recover: entry.auto_recover,
                    });
                }
            }
        }
        events
    }

    /// Spawn the periodic scan loop.
    ///
    /// Hard freezes on units registered with auto-recover are handed to
    /// the recovery engine as synthetic frozen failures. The loop exits
    /// when the shutdown channel fires.
    pub fn spawn_scan_loop(
        self: Arc<Self>,
        recovery: Arc<CrashRecoveryEngine>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_millis(self.config.scan_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for event in self.scan_once().await {
                            if !event.auto_recover {
                                continue;
                            }
                            let record = ErrorRecord::classify(format!(
                                "unit '{}' frozen (deadlock suspected: {})",
                                event.unit, event.deadlock_suspected
                            ))
                            .with_severity(ErrorSeverity::Recoverable)
                            .with_context("unit", event.unit.clone())
                            .with_context("source", "watchdog");

                            match recovery.handle_failure(&event.unit, None, Some(record)).await {
                                Ok(result) => {
                                    if result.recovered {
                                        // Fresh process gets a fresh activity window
                                        let _ = self.reset(&event.unit).await;
                                    }
                                }
                                Err(e) => {
                                    tracing::error!(unit = %event.unit, "Freeze recovery failed: {}", e);
                                }
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("Watchdog scan loop stopping");
                        break;
                    }
                }
            }
        })
    }
}

/// Consecutive Hard observations before deadlock suspicion fires.
const DEADLOCK_SUSPICION_STRIKES: u32 = 3;

fn classify(entry: &WatchdogEntry) -> FreezeLevel {
    // Disarmed until first activity
    let Some(last_activity) = entry.last_activity else {
        return FreezeLevel::None;
    };
    let quiet = last_activity.elapsed();
    if quiet > entry.hard_threshold {
        FreezeLevel::Hard
    } else if quiet > entry.soft_threshold {
        FreezeLevel::Soft
    } else {
        FreezeLevel::None
    }
}
