//! Orchestrator tests

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::*;
use crate::core::config::ServiceSpec;
use crate::supervisor::UnitState;

fn sleeper(name: &str) -> ServiceSpec {
    ServiceSpec::new(name, vec!["sleep".to_string(), "30".to_string()])
}

async fn orchestrator() -> (Arc<ProcessSupervisor>, DependencyOrchestrator) {
    let supervisor = Arc::new(ProcessSupervisor::new(Duration::from_secs(5)));
    let orch = DependencyOrchestrator::new(supervisor.clone());
    (supervisor, orch)
}

#[tokio::test]
async fn test_diamond_resolves_dependencies_first() {
    let (_, orch) = orchestrator().await;
    // db <- {api, worker} <- gateway
    orch.register_service("db", vec![]).await;
    orch.register_service("api", vec!["db".to_string()]).await;
    orch.register_service("worker", vec!["db".to_string()]).await;
    orch.register_service("gateway", vec!["api".to_string(), "worker".to_string()])
        .await;

    let order = orch.resolve_start_order().await.unwrap();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "db");
    assert_eq!(order[3], "gateway");

    let api = order.iter().position(|n| n == "api").unwrap();
    let worker = order.iter().position(|n| n == "worker").unwrap();
    assert!(api > 0 && api < 3);
    assert!(worker > 0 && worker < 3);
}

#[tokio::test]
async fn test_cycle_is_rejected() {
    let (_, orch) = orchestrator().await;
    orch.register_service("a", vec!["c".to_string()]).await;
    orch.register_service("b", vec!["a".to_string()]).await;
    orch.register_service("c", vec!["b".to_string()]).await;

    let err = orch.resolve_start_order().await.unwrap_err();
    match err {
        OrchestratorError::CircularDependency(stuck) => {
            assert_eq!(stuck, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        }
        other => panic!("expected cycle error, got {other}"),
    }
}

#[tokio::test]
async fn test_unknown_dependency_is_rejected() {
    let (_, orch) = orchestrator().await;
    orch.register_service("app", vec!["ghost".to_string()]).await;

    let err = orch.resolve_start_order().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownService(name) if name == "ghost"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_all_in_order_then_stop_all() {
    let (supervisor, orch) = orchestrator().await;
    for name in ["db", "api", "gateway"] {
        supervisor.register(sleeper(name)).await.unwrap();
    }
    orch.register_service("db", vec![]).await;
    orch.register_service("api", vec!["db".to_string()]).await;
    orch.register_service("gateway", vec!["api".to_string()]).await;

    let order = orch.start_all().await.unwrap();
    assert_eq!(
        order,
        vec!["db".to_string(), "api".to_string(), "gateway".to_string()]
    );
    assert_eq!(supervisor.realized_start_order().await, order);
    for name in &order {
        assert!(supervisor.is_running(name).await);
    }

    orch.stop_all(Duration::from_secs(9)).await.unwrap();
    for name in &order {
        assert_eq!(supervisor.state(name).await.unwrap(), UnitState::Stopped);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_all_abort_leaves_started_running() {
    let (supervisor, orch) = orchestrator().await;
    supervisor.register(sleeper("db")).await.unwrap();
    supervisor
        .register(ServiceSpec::new(
            "broken",
            vec!["/nonexistent/binary/path".to_string()],
        ))
        .await
        .unwrap();
    supervisor.register(sleeper("late")).await.unwrap();

    orch.register_service("db", vec![]).await;
    orch.register_service("broken", vec!["db".to_string()]).await;
    orch.register_service("late", vec!["broken".to_string()]).await;

    let err = orch.start_all().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Supervisor(_)));

    // The already-started dependency stays up; the tail never started
    assert!(supervisor.is_running("db").await);
    assert_eq!(supervisor.state("broken").await.unwrap(), UnitState::Failed);
    assert_eq!(supervisor.state("late").await.unwrap(), UnitState::Uninitialized);

    supervisor.stop("db", Duration::from_secs(5)).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_restart_service_does_not_cascade() {
    let (supervisor, orch) = orchestrator().await;
    for name in ["db", "api"] {
        supervisor.register(sleeper(name)).await.unwrap();
    }
    orch.register_service("db", vec![]).await;
    orch.register_service("api", vec!["db".to_string()]).await;
    orch.start_all().await.unwrap();

    let api_pid = supervisor.pid("api").await.unwrap();
    orch.restart_service("db").await.unwrap();

    // The dependent kept its process
    assert_eq!(supervisor.pid("api").await.unwrap(), api_pid);
    assert_eq!(supervisor.restart_count("db").await.unwrap(), 1);
    assert_eq!(supervisor.restart_count("api").await.unwrap(), 0);

    orch.stop_all(Duration::from_secs(9)).await.unwrap();
}

#[tokio::test]
async fn test_restart_unknown_service() {
    let (_, orch) = orchestrator().await;
    let err = orch.restart_service("ghost").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownService(_)));
}

proptest! {
    /// Any DAG whose edges all point from a lower to a higher index
    /// must resolve with every dependency ahead of its dependent.
    #[test]
    fn prop_resolved_order_respects_edges(
        edges in prop::collection::btree_set(
            (0usize..7, 0usize..7).prop_filter("no self-deps", |(a, b)| a != b),
            0..15,
        )
    ) {
        let edges: Vec<(usize, usize)> = edges
            .into_iter()
            .map(|(a, b)| if a < b { (a, b) } else { (b, a) })
            .collect();

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let supervisor = Arc::new(ProcessSupervisor::new(Duration::from_secs(5)));
            let orch = DependencyOrchestrator::new(supervisor);

            for i in 0..7usize {
                let deps = edges
                    .iter()
                    .filter(|(_, to)| *to == i)
                    .map(|(from, _)| format!("s{from}"))
                    .collect();
                orch.register_service(format!("s{i}"), deps).await;
            }

            let order = orch.resolve_start_order().await.unwrap();
            prop_assert_eq!(order.len(), 7);
            for (from, to) in &edges {
                let from_pos = order.iter().position(|n| n == &format!("s{from}")).unwrap();
                let to_pos = order.iter().position(|n| n == &format!("s{to}")).unwrap();
                prop_assert!(from_pos < to_pos, "s{} must start before s{}", from, to);
            }
            Ok(())
        })?;
    }
}
