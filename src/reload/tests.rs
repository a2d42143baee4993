//! Hot-reload tests
//!
//! Mtime changes are applied with `File::set_modified` instead of
//! sleeping past filesystem timestamp granularity.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use super::*;
use crate::checkpoint::CheckpointStore;
use crate::db::{create_database_pool, DatabaseConfig};
use crate::supervisor::UnitState;

async fn store(dir: &TempDir) -> Arc<CheckpointStore> {
    let config = DatabaseConfig::with_path(dir.path().join("ckpt.db"));
    let pool = create_database_pool(&config).await.unwrap();
    Arc::new(CheckpointStore::new(pool, 10).await.unwrap())
}

async fn coordinator(dir: &TempDir) -> (Arc<ProcessSupervisor>, Arc<CheckpointStore>, HotReloadCoordinator) {
    let supervisor = Arc::new(ProcessSupervisor::new(Duration::from_secs(5)));
    let store = store(dir).await;
    let coordinator = HotReloadCoordinator::new(supervisor.clone(), store.clone());
    (supervisor, store, coordinator)
}

fn sleeper(name: &str, secs: &str) -> ServiceSpec {
    ServiceSpec::new(name, vec!["sleep".to_string(), secs.to_string()])
}

fn touch_future(path: &std::path::Path) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(10))
        .unwrap();
}

#[tokio::test]
async fn test_change_detection_reports_once() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _, coordinator) = coordinator(&dir).await;

    let config_file = dir.path().join("unit.conf");
    std::fs::write(&config_file, "v1").unwrap();

    let mut spec = sleeper("svc", "30");
    spec.reload_paths = vec![config_file.clone()];
    supervisor.register(spec).await.unwrap();
    coordinator.track("svc").await.unwrap();

    assert!(coordinator.check_for_changes().await.is_empty());

    touch_future(&config_file);
    assert_eq!(coordinator.check_for_changes().await, vec!["svc".to_string()]);
    // The new mtime became the baseline
    assert!(coordinator.check_for_changes().await.is_empty());
}

#[tokio::test]
async fn test_deleted_path_counts_as_changed() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _, coordinator) = coordinator(&dir).await;

    let config_file = dir.path().join("unit.conf");
    std::fs::write(&config_file, "v1").unwrap();

    let mut spec = sleeper("svc", "30");
    spec.reload_paths = vec![config_file.clone()];
    supervisor.register(spec).await.unwrap();
    coordinator.track("svc").await.unwrap();

    std::fs::remove_file(&config_file).unwrap();
    assert_eq!(coordinator.check_for_changes().await, vec!["svc".to_string()]);
    assert!(coordinator.check_for_changes().await.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_reload_swaps_descriptor_and_snapshots() {
    let dir = TempDir::new().unwrap();
    let (supervisor, store, coordinator) = coordinator(&dir).await;

    supervisor.register(sleeper("svc", "30")).await.unwrap();
    supervisor.start("svc").await.unwrap();
    let old_pid = supervisor.pid("svc").await.unwrap().unwrap();

    let outcome = coordinator
        .reload("svc", Some(sleeper("svc", "31")), true)
        .await
        .unwrap();
    assert!(outcome.reloaded);
    assert!(!outcome.rolled_back);

    let new_pid = supervisor.pid("svc").await.unwrap().unwrap();
    assert_ne!(new_pid, old_pid);
    assert_eq!(
        supervisor.spec("svc").await.unwrap().command,
        vec!["sleep".to_string(), "31".to_string()]
    );

    // The pre-reload descriptor was snapshotted for rollback
    let history = store.history("svc", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].metadata["source"], "reload");

    supervisor.stop("svc", Duration::from_secs(5)).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_reload_rolls_back_on_start_failure() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _, coordinator) = coordinator(&dir).await;

    supervisor.register(sleeper("svc", "30")).await.unwrap();
    supervisor.start("svc").await.unwrap();

    let broken = ServiceSpec::new("svc", vec!["/nonexistent/binary/path".to_string()]);
    let outcome = coordinator.reload("svc", Some(broken), true).await.unwrap();
    assert!(!outcome.reloaded);
    assert!(outcome.rolled_back);

    // Back on the old descriptor and running
    assert_eq!(supervisor.state("svc").await.unwrap(), UnitState::Running);
    assert_eq!(
        supervisor.spec("svc").await.unwrap().command,
        vec!["sleep".to_string(), "30".to_string()]
    );

    supervisor.stop("svc", Duration::from_secs(5)).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_reload_without_preserve_reports_failure() {
    let dir = TempDir::new().unwrap();
    let (supervisor, store, coordinator) = coordinator(&dir).await;

    supervisor.register(sleeper("svc", "30")).await.unwrap();
    supervisor.start("svc").await.unwrap();

    let broken = ServiceSpec::new("svc", vec!["/nonexistent/binary/path".to_string()]);
    let err = coordinator.reload("svc", Some(broken), false).await.unwrap_err();
    assert!(matches!(err, ReloadError::Supervisor(_)));

    // No snapshot, no rollback: the unit is down under the new descriptor
    assert_ne!(supervisor.state("svc").await.unwrap(), UnitState::Running);
    assert!(store.history("svc", 10).await.unwrap().is_empty());
}
