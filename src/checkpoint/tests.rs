//! Checkpoint store tests

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::db::{create_database_pool, DatabaseConfig};

async fn store(dir: &TempDir, retention: u32) -> CheckpointStore {
    let config = DatabaseConfig::with_path(dir.path().join("checkpoints.db"));
    let pool = create_database_pool(&config).await.unwrap();
    CheckpointStore::new(pool, retention).await.unwrap()
}

#[tokio::test]
async fn test_save_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 10).await;

    let payload = json!({"positions": [1, 2, 3], "cash": 10_000.5});
    store
        .save("trading-sim", payload.clone(), json!({"reason": "pre-recovery"}))
        .await
        .unwrap();

    let restored = store.restore("trading-sim", None).await.unwrap();
    assert_eq!(restored.payload, payload);
    assert_eq!(restored.key, "trading-sim");
    assert_eq!(restored.metadata["reason"], "pre-recovery");
}

#[tokio::test]
async fn test_restore_returns_newest() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 10).await;

    for i in 0..3 {
        store.save("unit", json!({"rev": i}), json!({})).await.unwrap();
    }

    let restored = store.restore("unit", None).await.unwrap();
    assert_eq!(restored.payload["rev"], 2);
}

#[tokio::test]
async fn test_restore_at_timestamp() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 10).await;

    let first = store.save("unit", json!({"rev": 0}), json!({})).await.unwrap();
    store.save("unit", json!({"rev": 1}), json!({})).await.unwrap();

    let restored = store.restore("unit", Some(first.created_at)).await.unwrap();
    assert_eq!(restored.payload["rev"], 0);
}

#[tokio::test]
async fn test_retention_prunes_oldest() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 3).await;

    for i in 0..4 {
        store.save("unit", json!({"rev": i}), json!({})).await.unwrap();
    }

    let history = store.history("unit", 10).await.unwrap();
    assert_eq!(history.len(), 3);
    // Newest first; rev 0 was pruned
    assert_eq!(history[0].payload["rev"], 3);
    assert_eq!(history[2].payload["rev"], 1);
}

#[tokio::test]
async fn test_retention_is_per_key() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 2).await;

    for i in 0..3 {
        store.save("a", json!({"rev": i}), json!({})).await.unwrap();
    }
    store.save("b", json!({"rev": 0}), json!({})).await.unwrap();

    assert_eq!(store.history("a", 10).await.unwrap().len(), 2);
    assert_eq!(store.history("b", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_key_not_found() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 10).await;

    assert!(matches!(
        store.restore("ghost", None).await,
        Err(CheckpointError::NotFound(_))
    ));
    assert!(store.history("ghost", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovery_log_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 10).await;

    store.log_recovery("restart", "success", "unit a restarted").await.unwrap();
    store.log_recovery("backoff_restart", "failed", "unit b spawn failed").await.unwrap();

    let entries = store.recent_recoveries(10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].recovery_type, "backoff_restart");
    assert_eq!(entries[1].status, "success");
}
