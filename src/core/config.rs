//! Configuration module for ProcWarden
//!
//! Handles supervisor configuration including:
//! - Service descriptors (command, cwd, env, dependencies)
//! - Monitoring intervals and thresholds
//! - Recovery policy defaults
//! - Storage paths

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Descriptor for one supervised service.
///
/// The launch command is an argv list, never a shell string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique service name
    pub name: String,

    /// Executable followed by its arguments
    pub command: Vec<String>,

    /// Working directory (inherits the supervisor's when absent)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Environment variable overrides
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Restart automatically when the process exits or freezes
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Upper bound on backoff restart attempts
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Backoff base in seconds: sleep base^retry before each retry
    #[serde(default = "default_backoff_base")]
    pub restart_backoff_base: f64,

    /// Names of services that must be Running before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Optional HTTP health endpoint, probed with a bounded timeout
    #[serde(default)]
    pub health_endpoint: Option<String>,

    /// Artifact paths watched for hot reload
    #[serde(default)]
    pub reload_paths: Vec<PathBuf>,
}

impl ServiceSpec {
    /// Minimal spec: a name and an argv command.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
            env: HashMap::new(),
            auto_restart: true,
            max_restarts: default_max_restarts(),
            restart_backoff_base: default_backoff_base(),
            dependencies: Vec::new(),
            health_endpoint: None,
            reload_paths: Vec::new(),
        }
    }

    /// Declare a dependency on another service.
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Validate the descriptor shape.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("service name is empty".to_string()));
        }
        if self.command.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "service '{}' has an empty command",
                self.name
            )));
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(ConfigError::Invalid(format!(
                "service '{}' depends on itself",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

/// Watchdog scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Scan loop interval in milliseconds
    pub scan_interval_ms: u64,

    /// Soft freeze threshold in seconds (advisory)
    pub soft_threshold_secs: u64,

    /// Hard freeze threshold in seconds (actionable)
    pub hard_threshold_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 5_000,
            soft_threshold_secs: 60,
            hard_threshold_secs: 300,
        }
    }
}

/// Recovery engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Failures within the window that trip the circuit
    pub circuit_threshold: u32,

    /// Sliding window for counting failures, in seconds
    pub circuit_window_secs: u64,

    /// Cool-down before an open circuit closes again, in seconds
    pub circuit_timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            circuit_threshold: 5,
            circuit_window_secs: 300,
            circuit_timeout_secs: 60,
        }
    }
}

/// Health polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Health poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Heartbeat age after which a unit counts as frozen, in seconds
    pub heartbeat_timeout_secs: u64,

    /// HTTP probe timeout in seconds (never blocks the loop past this)
    pub probe_timeout_secs: u64,

    /// CPU usage threshold in percent
    pub cpu_threshold_pct: f32,

    /// Memory usage threshold in percent
    pub memory_threshold_pct: f32,

    /// Disk usage threshold in percent
    pub disk_threshold_pct: f32,

    /// TCP address probed for basic network reachability, e.g.
    /// "1.1.1.1:53"; unset skips the reachability check
    #[serde(default)]
    pub reachability_target: Option<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            heartbeat_timeout_secs: 120,
            probe_timeout_secs: 5,
            cpu_threshold_pct: 90.0,
            memory_threshold_pct: 90.0,
            disk_threshold_pct: 95.0,
            reachability_target: None,
        }
    }
}

/// Top-level supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Supervised services
    #[serde(default)]
    pub services: Vec<ServiceSpec>,

    /// Watchdog settings
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Recovery settings
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Health settings
    #[serde(default)]
    pub health: HealthConfig,

    /// Checkpoint database path (platform data dir when absent)
    #[serde(default)]
    pub checkpoint_db: Option<PathBuf>,

    /// Crash dump directory (platform data dir when absent)
    #[serde(default)]
    pub crash_dump_dir: Option<PathBuf>,

    /// Graceful-stop timeout per unit, in seconds
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Overall shutdown deadline, in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Checkpoint retention per key
    #[serde(default = "default_retention")]
    pub checkpoint_retention: u32,

    /// Hot-reload artifact poll interval, in milliseconds
    #[serde(default = "default_reload_poll_interval")]
    pub reload_poll_interval_ms: u64,
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    60
}

fn default_retention() -> u32 {
    10
}

fn default_reload_poll_interval() -> u64 {
    5_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            watchdog: WatchdogConfig::default(),
            recovery: RecoveryConfig::default(),
            health: HealthConfig::default(),
            checkpoint_db: None,
            crash_dump_dir: None,
            stop_timeout_secs: default_stop_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            checkpoint_retention: default_retention(),
            reload_poll_interval_ms: default_reload_poll_interval(),
        }
    }
}

impl AppConfig {
    /// Default config file path under the platform config dir.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "procwarden", "ProcWarden")
            .map(|dirs| dirs.config_dir().join("procwarden.json"))
            .unwrap_or_else(|| PathBuf::from("procwarden.json"))
    }

    /// Graceful-stop timeout as a Duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Shutdown deadline as a Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Hot-reload poll interval as a Duration.
    pub fn reload_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reload_poll_interval_ms)
    }

    /// Validate every service descriptor and check for duplicate names.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.services {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service name '{}'",
                    spec.name
                )));
            }
        }
        let names: std::collections::HashSet<&str> =
            self.services.iter().map(|s| s.name.as_str()).collect();
        for spec in &self.services {
            for dep in &spec.dependencies {
                if !names.contains(dep.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "service '{}' depends on unknown service '{}'",
                        spec.name, dep
                    )));
                }
            }
        }
        Ok(())
    }

    /// Load a configuration file, or defaults when it does not exist.
    pub async fn load_or_default(path: &Path) -> ConfigResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(body) => {
                let config: Self = serde_json::from_str(&body)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Save atomically: write a temp file, then rename over the target.
    pub async fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec::new(name, vec!["sleep".to_string(), "30".to_string()])
    }

    #[test]
    fn test_service_spec_defaults() {
        let s = spec("worker");
        assert!(s.auto_restart);
        assert_eq!(s.max_restarts, 3);
        assert!(s.dependencies.is_empty());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_empty_command_rejected() {
        let s = ServiceSpec::new("bad", vec![]);
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let s = spec("a").with_dependency("a");
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = AppConfig {
            services: vec![spec("a"), spec("a")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let config = AppConfig {
            services: vec![spec("a").with_dependency("ghost")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        let config = AppConfig::load_or_default(&path).await.unwrap();
        assert!(config.services.is_empty());
        assert_eq!(config.recovery.circuit_threshold, 5);
        assert_eq!(config.reload_poll_interval_ms, 5_000);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("procwarden.json");

        let config = AppConfig {
            services: vec![spec("a"), spec("b").with_dependency("a")],
            reload_poll_interval_ms: 1_000,
            ..Default::default()
        };
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load_or_default(&path).await.unwrap();
        assert_eq!(loaded.services.len(), 2);
        assert_eq!(loaded.services[1].dependencies, vec!["a".to_string()]);
        assert_eq!(loaded.reload_poll_interval_ms, 1_000);
        // Temp file must not linger after the rename
        assert!(!path.with_extension("json.tmp").exists());
    }
}
