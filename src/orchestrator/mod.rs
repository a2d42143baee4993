//! Dependency Orchestration Module
//!
//! Resolves a start order from the declared dependency graph with
//! Kahn's algorithm and sequences supervisor calls accordingly. A unit
//! is never started before all of its dependencies report running;
//! shutdown runs in the exact reverse of the realized start order.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::supervisor::{ProcessSupervisor, SupervisorError};

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Circular dependency among: {0:?}")]
    CircularDependency(Vec<String>),

    #[error("Unit '{unit}' depends on '{dependency}', which is not running")]
    DependencyNotRunning { unit: String, dependency: String },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

/// Orchestration result type
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Sequences unit starts and stops over the dependency graph.
pub struct DependencyOrchestrator {
    supervisor: Arc<ProcessSupervisor>,
    /// Unit name -> names it depends on. BTreeMap keeps resolution
    /// deterministic across runs.
    graph: RwLock<BTreeMap<String, Vec<String>>>,
}

impl DependencyOrchestrator {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            graph: RwLock::new(BTreeMap::new()),
        }
    }

    /// Declare a service and the names it depends on.
    pub async fn register_service(
        &self,
        name: impl Into<String>,
        dependencies: Vec<String>,
    ) {
        let mut graph = self.graph.write().await;
        graph.insert(name.into(), dependencies);
    }

    /// Topologically sort the graph, dependencies first.
    ///
    /// Fails when a dependency names an unregistered service or when
    /// the graph contains a cycle.
    pub async fn resolve_start_order(&self) -> OrchestratorResult<Vec<String>> {
        let graph = self.graph.read().await;

        for (name, deps) in graph.iter() {
            for dep in deps {
                if !graph.contains_key(dep) {
                    tracing::error!(unit = %name, dependency = %dep, "Unknown dependency");
                    return Err(OrchestratorError::UnknownService(dep.clone()));
                }
            }
        }

        // Kahn's algorithm; the ready set is ordered so ties break by name
        let mut in_degree: BTreeMap<&str, usize> = graph
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, deps) in graph.iter() {
            for dep in deps {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(name.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(graph.len());

        while let Some(next) = ready.iter().next().copied() {
            ready.remove(next);
            order.push(next.to_string());
            for dependent in dependents.get(next).into_iter().flatten() {
                let degree = in_degree
                    .get_mut(dependent)
                    .ok_or_else(|| OrchestratorError::UnknownService(dependent.to_string()))?;
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < graph.len() {
            let mut stuck: Vec<String> = graph
                .keys()
                .filter(|name| !order.contains(name))
                .cloned()
                .collect();
            stuck.sort();
            tracing::error!(units = ?stuck, "Dependency cycle detected");
            return Err(OrchestratorError::CircularDependency(stuck));
        }

        Ok(order)
    }

    /// Start every registered service in dependency order.
    ///
    /// Each unit is started only after all of its declared dependencies
    /// report running. On any failure the sequence aborts; units already
    /// started are left running.
    pub async fn start_all(&self) -> OrchestratorResult<Vec<String>> {
        let order = self.resolve_start_order().await?;
        tracing::info!(?order, "Starting services in dependency order");

        for name in &order {
            let deps = {
                let graph = self.graph.read().await;
                graph.get(name).cloned().unwrap_or_default()
            };
            for dep in &deps {
                if !self.supervisor.is_running(dep).await {
                    tracing::error!(unit = %name, dependency = %dep, "Dependency not running, aborting");
                    return Err(OrchestratorError::DependencyNotRunning {
                        unit: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            self.supervisor.start(name).await?;
        }

        Ok(order)
    }

    /// Stop everything in the exact reverse of the realized start order.
    pub async fn stop_all(&self, timeout: Duration) -> OrchestratorResult<()> {
        self.supervisor.shutdown_all(timeout).await?;
        Ok(())
    }

    /// Targeted stop-then-start of one service, outside global ordering.
    ///
    /// Used for recovery of a single unit; dependents are deliberately
    /// left alone.
    pub async fn restart_service(&self, name: &str) -> OrchestratorResult<u32> {
        {
            let graph = self.graph.read().await;
            if !graph.contains_key(name) {
                return Err(OrchestratorError::UnknownService(name.to_string()));
            }
        }
        let pid = self.supervisor.restart(name).await?;
        Ok(pid)
    }

    /// Names currently registered, sorted.
    pub async fn service_names(&self) -> Vec<String> {
        let graph = self.graph.read().await;
        graph.keys().cloned().collect()
    }
}
