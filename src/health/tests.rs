//! Health aggregator tests
//!
//! Probe tests run a minimal HTTP responder on a loopback listener so
//! no external services are involved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::*;
use crate::core::config::{HealthConfig, ServiceSpec};

fn aggregator() -> (Arc<ProcessSupervisor>, Arc<HealthAggregator>) {
    let supervisor = Arc::new(ProcessSupervisor::new(Duration::from_secs(5)));
    let health = Arc::new(HealthAggregator::new(
        supervisor.clone(),
        HealthConfig::default(),
    ));
    (supervisor, health)
}

/// Serve canned HTTP responses; the status line for connection `n`
/// comes from `statuses[min(n, len-1)]`.
async fn spawn_http_server(statuses: &'static [&'static str]) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let n = hits.fetch_add(1, Ordering::SeqCst);
            let status = statuses[n.min(statuses.len() - 1)];
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// An address that refuses connections: bind, record, drop.
async fn refused_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn probed_unit(name: &str, addr: std::net::SocketAddr) -> ServiceSpec {
    let mut spec = ServiceSpec::new(name, vec!["sleep".to_string(), "30".to_string()]);
    spec.health_endpoint = Some(format!("http://{addr}/health"));
    spec
}

#[tokio::test]
async fn test_unregistered_unit_errors() {
    let (_, health) = aggregator();
    let err = health.check_unit_health("ghost").await.unwrap_err();
    assert!(matches!(err, HealthError::NotRegistered(_)));
    let err = health.heartbeat("ghost").await.unwrap_err();
    assert!(matches!(err, HealthError::NotRegistered(_)));
}

#[tokio::test]
async fn test_healthy_by_default_without_signals() {
    let (supervisor, health) = aggregator();
    supervisor
        .register(ServiceSpec::new("quiet", vec!["sleep".to_string(), "30".to_string()]))
        .await
        .unwrap();
    health.register_process("quiet").await;

    // No pid, no heartbeat, no endpoint: absence of evidence of failure
    let record = health.check_unit_health("quiet").await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_heartbeat_is_unhealthy() {
    let (supervisor, health) = aggregator();
    supervisor
        .register(ServiceSpec::new("hb", vec!["sleep".to_string(), "30".to_string()]))
        .await
        .unwrap();
    health.register_process("hb").await;
    health.heartbeat("hb").await.unwrap();

    // Fresh heartbeat is fine
    tokio::time::advance(Duration::from_secs(10)).await;
    let record = health.check_unit_health("hb").await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);

    // Default timeout is 120s; a 130s-old heartbeat is stale
    tokio::time::advance(Duration::from_secs(130)).await;
    let record = health.check_unit_health("hb").await.unwrap();
    assert_eq!(record.status, HealthStatus::Unhealthy);
    assert_eq!(record.consecutive_failures, 1);

    // A new heartbeat clears the verdict
    health.heartbeat("hb").await.unwrap();
    let record = health.check_unit_health("hb").await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test]
async fn test_probe_200_is_healthy() {
    let (supervisor, health) = aggregator();
    let addr = spawn_http_server(&["200 OK"]).await;
    supervisor.register(probed_unit("web", addr)).await.unwrap();
    health.register_process("web").await;

    let record = health.check_unit_health("web").await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_probe_failures_accumulate_then_reset() {
    let (supervisor, health) = aggregator();
    // Two 500s, then a 200
    let addr = spawn_http_server(&["500 Internal Server Error", "500 Internal Server Error", "200 OK"]).await;
    supervisor.register(probed_unit("web", addr)).await.unwrap();
    health.register_process("web").await;

    let record = health.check_unit_health("web").await.unwrap();
    assert_eq!(record.status, HealthStatus::Degraded);
    assert_eq!(record.consecutive_failures, 1);

    let record = health.check_unit_health("web").await.unwrap();
    assert_eq!(record.status, HealthStatus::Degraded);
    assert_eq!(record.consecutive_failures, 2);

    let record = health.check_unit_health("web").await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test]
async fn test_probe_connection_error_is_unhealthy() {
    let (supervisor, health) = aggregator();
    let addr = refused_addr().await;
    supervisor.register(probed_unit("down", addr)).await.unwrap();
    health.register_process("down").await;

    let record = health.check_unit_health("down").await.unwrap();
    assert_eq!(record.status, HealthStatus::Unhealthy);
    assert_eq!(record.consecutive_failures, 1);
    assert!(record.reason.as_deref().unwrap().contains("probe failed"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_running_unit_with_live_pid_is_healthy() {
    let (supervisor, health) = aggregator();
    supervisor
        .register(ServiceSpec::new("live", vec!["sleep".to_string(), "30".to_string()]))
        .await
        .unwrap();
    supervisor.start("live").await.unwrap();
    health.register_process("live").await;

    let record = health.check_unit_health("live").await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);

    supervisor.stop("live", Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_full_report_majority_unhealthy() {
    let (supervisor, health) = aggregator();
    let refused = refused_addr().await;

    // Two units with dead probes, one quiet unit
    for name in ["dead-a", "dead-b"] {
        supervisor.register(probed_unit(name, refused)).await.unwrap();
        health.register_process(name).await;
    }
    supervisor
        .register(ServiceSpec::new("ok", vec!["sleep".to_string(), "30".to_string()]))
        .await
        .unwrap();
    health.register_process("ok").await;

    let report = health.perform_full_health_check(None).await;
    assert_eq!(report.units.len(), 3);
    assert_eq!(report.overall, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_full_report_single_degraded_unit() {
    let (supervisor, health) = aggregator();
    let addr = spawn_http_server(&["503 Service Unavailable"]).await;
    supervisor.register(probed_unit("shaky", addr)).await.unwrap();
    health.register_process("shaky").await;
    supervisor
        .register(ServiceSpec::new("ok", vec!["sleep".to_string(), "30".to_string()]))
        .await
        .unwrap();
    health.register_process("ok").await;

    let report = health.perform_full_health_check(None).await;
    // One degraded unit out of two: issues, but no unhealthy majority
    assert_eq!(report.overall, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_rolling_log_is_bounded() {
    let (supervisor, health) = aggregator();
    supervisor
        .register(ServiceSpec::new("chatty", vec!["sleep".to_string(), "30".to_string()]))
        .await
        .unwrap();
    health.register_process("chatty").await;

    for _ in 0..(ROLLING_LOG_CAP + 5) {
        health.check_unit_health("chatty").await.unwrap();
    }
    assert_eq!(health.history("chatty").await.len(), ROLLING_LOG_CAP);
    assert!(health.last_record("chatty").await.is_some());
}

#[test]
fn test_resource_snapshot_breach_thresholds() {
    let mut snapshot = ResourceSnapshot {
        cpu_pct: 10.0,
        memory_pct: 10.0,
        disk_pct: 10.0,
        network_reachable: None,
        breaches: vec![],
    };
    assert_eq!(snapshot.status(), HealthStatus::Healthy);

    snapshot.breaches = vec!["cpu".into()];
    assert_eq!(snapshot.status(), HealthStatus::Degraded);
    snapshot.breaches = vec!["cpu".into(), "memory".into()];
    assert_eq!(snapshot.status(), HealthStatus::Degraded);
    snapshot.breaches = vec!["cpu".into(), "memory".into(), "disk".into()];
    assert_eq!(snapshot.status(), HealthStatus::Unhealthy);
}
