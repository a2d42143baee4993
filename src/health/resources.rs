//! System resource sampling
//!
//! CPU, memory and disk figures come from `sysinfo`; sampling happens
//! on the blocking pool because an accurate CPU reading needs two
//! refreshes separated by a real-time wait.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use crate::core::config::HealthConfig;
use crate::health::HealthStatus;

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Point-in-time system resource usage with threshold breaches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_pct: f32,
    pub memory_pct: f32,
    /// Highest usage across mounted disks
    pub disk_pct: f32,
    /// None when no reachability target is configured
    pub network_reachable: Option<bool>,
    pub breaches: Vec<String>,
}

impl ResourceSnapshot {
    /// One or two breached thresholds degrade the system; more than
    /// two make it unhealthy.
    pub fn status(&self) -> HealthStatus {
        match self.breaches.len() {
            0 => HealthStatus::Healthy,
            1 | 2 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

/// Sample current resource usage and compare against thresholds.
pub(crate) async fn sample(config: &HealthConfig) -> ResourceSnapshot {
    let (cpu_pct, memory_pct, disk_pct) = match tokio::task::spawn_blocking(sample_blocking).await
    {
        Ok(figures) => figures,
        Err(e) => {
            tracing::warn!("Resource sampling task failed: {}", e);
            (0.0, 0.0, 0.0)
        }
    };

    let network_reachable = match &config.reachability_target {
        Some(addr) => {
            let connect = tokio::net::TcpStream::connect(addr.as_str());
            Some(matches!(
                tokio::time::timeout(REACHABILITY_TIMEOUT, connect).await,
                Ok(Ok(_))
            ))
        }
        None => None,
    };

    let mut breaches = Vec::new();
    if cpu_pct > config.cpu_threshold_pct {
        breaches.push(format!("cpu {cpu_pct:.1}% > {:.1}%", config.cpu_threshold_pct));
    }
    if memory_pct > config.memory_threshold_pct {
        breaches.push(format!(
            "memory {memory_pct:.1}% > {:.1}%",
            config.memory_threshold_pct
        ));
    }
    if disk_pct > config.disk_threshold_pct {
        breaches.push(format!("disk {disk_pct:.1}% > {:.1}%", config.disk_threshold_pct));
    }
    if network_reachable == Some(false) {
        breaches.push("network unreachable".to_string());
    }

    ResourceSnapshot {
        cpu_pct,
        memory_pct,
        disk_pct,
        network_reachable,
        breaches,
    }
}

fn sample_blocking() -> (f32, f32, f32) {
    let mut sys = System::new();
    sys.refresh_cpu();
    // Two CPU refreshes with a real wait in between, per sysinfo docs
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();
    let cpu = sys.global_cpu_info().cpu_usage();

    sys.refresh_memory();
    let memory = if sys.total_memory() == 0 {
        0.0
    } else {
        sys.used_memory() as f32 / sys.total_memory() as f32 * 100.0
    };

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .map(|d| {
            if d.total_space() == 0 {
                0.0
            } else {
                (d.total_space() - d.available_space()) as f32 / d.total_space() as f32 * 100.0
            }
        })
        .fold(0.0f32, f32::max);

    (cpu, memory, disk)
}

/// Whether the OS still reports a process with the given pid.
pub(crate) fn process_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(sysinfo::Pid::from_u32(pid))
}
