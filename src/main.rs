//! ProcWarden daemon entry point.
//!
//! Wires the supervisor, watchdog, recovery engine, health aggregator,
//! orchestrator and reload coordinator together, starts all configured
//! services in dependency order, and supervises them until a
//! termination signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use procwarden::checkpoint::CheckpointStore;
use procwarden::core::config::AppConfig;
use procwarden::core::error::CrashDumpWriter;
use procwarden::db::{create_database_pool, DatabaseConfig};
use procwarden::health::HealthAggregator;
use procwarden::logging::{LoggingConfig, LoggingSystem};
use procwarden::orchestrator::DependencyOrchestrator;
use procwarden::recovery::CrashRecoveryEngine;
use procwarden::reload::HotReloadCoordinator;
use procwarden::supervisor::{PollStatus, ProcessSupervisor};
use procwarden::watchdog::Watchdog;
use tokio::sync::watch;

/// How often the crash-poll loop checks for exited processes.
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = if cfg!(debug_assertions) {
        LoggingConfig::development()
    } else {
        LoggingConfig::production()
    };
    // Keep the logging system alive so file buffers flush on exit
    let _logging = match LoggingSystem::init(logging_config) {
        Ok(system) => Some(system),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}. Using basic logging.");
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .init();
            None
        }
    };

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_default(&config_path).await?;
    tracing::info!(
        config = %config_path.display(),
        services = config.services.len(),
        "ProcWarden starting"
    );

    let db_config = match &config.checkpoint_db {
        Some(path) => DatabaseConfig::with_path(path.clone()),
        None => DatabaseConfig::default(),
    };
    let pool = create_database_pool(&db_config).await?;
    let store = Arc::new(CheckpointStore::new(pool, config.checkpoint_retention).await?);

    let dumps = CrashDumpWriter::new(
        config
            .crash_dump_dir
            .clone()
            .unwrap_or_else(CrashDumpWriter::default_dir),
    );

    let supervisor = Arc::new(ProcessSupervisor::new(config.stop_timeout()));
    let recovery = Arc::new(CrashRecoveryEngine::new(
        supervisor.clone(),
        Some(store.clone()),
        dumps,
        config.recovery.clone(),
    ));
    let watchdog = Arc::new(Watchdog::new(config.watchdog.clone()));
    let health = Arc::new(HealthAggregator::new(
        supervisor.clone(),
        config.health.clone(),
    ));
    let orchestrator = DependencyOrchestrator::new(supervisor.clone());
    let reload = Arc::new(HotReloadCoordinator::new(
        supervisor.clone(),
        store.clone(),
    ));

    for spec in &config.services {
        let name = spec.name.clone();
        supervisor.register(spec.clone()).await?;
        orchestrator
            .register_service(&name, spec.dependencies.clone())
            .await;
        health.register_process(&name).await;
        // Stays disarmed until the service first reports activity
        watchdog.register(&name, spec.auto_restart).await;
    }

    match orchestrator.start_all().await {
        Ok(order) => tracing::info!(?order, "All services started"),
        Err(e) => {
            // Units that did start keep running and stay supervised
            tracing::error!("Startup incomplete: {}", e);
        }
    }

    // Reload tracking needs the units registered first
    for spec in &config.services {
        if !spec.reload_paths.is_empty() {
            if let Err(e) = reload.track(&spec.name).await {
                tracing::warn!(unit = %spec.name, "Reload tracking failed: {}", e);
            }
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loops = Vec::new();
    loops.push(
        watchdog
            .clone()
            .spawn_scan_loop(recovery.clone(), shutdown_rx.clone()),
    );
    loops.push(
        health
            .clone()
            .spawn_monitor_loop(recovery.clone(), shutdown_rx.clone()),
    );
    loops.push(reload.clone().spawn_poll_loop(
        config.reload_poll_interval(),
        shutdown_rx.clone(),
    ));
    loops.push(spawn_crash_poll_loop(
        supervisor.clone(),
        recovery.clone(),
        shutdown_rx,
    ));

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    // Stop the monitoring loops before touching the processes, so a
    // health- or watchdog-triggered restart cannot race the shutdown
    let _ = shutdown_tx.send(true);
    for handle in loops {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    if let Err(e) = supervisor.shutdown_all(config.shutdown_timeout()).await {
        tracing::error!("Shutdown incomplete: {}", e);
    }
    tracing::info!("ProcWarden stopped");
    Ok(())
}

/// Detects exited processes and feeds them to the recovery engine.
fn spawn_crash_poll_loop(
    supervisor: Arc<ProcessSupervisor>,
    recovery: Arc<CrashRecoveryEngine>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for name in supervisor.unit_names().await {
                        match supervisor.poll(&name).await {
                            Ok(PollStatus::Exited(code)) => {
                                tracing::warn!(unit = %name, ?code, "Process exit detected");
                                if let Err(e) = recovery.handle_failure(&name, code, None).await {
                                    tracing::error!(unit = %name, "Recovery failed: {}", e);
                                }
                            }
                            Ok(PollStatus::Alive) => {}
                            Err(e) => {
                                tracing::warn!(unit = %name, "Poll failed: {}", e);
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("Crash poll loop stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
