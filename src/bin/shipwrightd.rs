//! Binary entry point: wires `PlatformConfig`, the store, the container
//! engine, the job queue, the worker pool, and the Supervisor together and
//! runs them until `SIGINT`/`SIGTERM`, with a bounded grace window for
//! in-flight jobs.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shipwright::api::PlatformApi;
use shipwright::client::DockerClient;
use shipwright::config::{PlanDefaults, PlatformConfig};
use shipwright::deployment_machine::{AppLocks, DeploymentMachine};
use shipwright::queue::WorkerPool;
use shipwright::quota::QuotaEngine;
use shipwright::store::{PostgresStore, Store};

/// Reads `PlatformConfig` from environment variables, falling back to the
/// documented defaults for anything unset. No global state: the result is
/// constructed once here and threaded down by `Arc`, per the redesign flag
/// in `spec.md` §9 that replaces ad-hoc process-wide state with an explicit
/// configuration object.
fn config_from_env() -> PlatformConfig {
    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/shipwright".to_string());
    let workdir_root = env::var("WORKDIR_ROOT").unwrap_or_else(|_| "/var/lib/shipwright/work".to_string());

    let mut config = PlatformConfig::with_defaults(database_url, PathBuf::from(workdir_root));

    if let Ok(root_domain) = env::var("ROOT_DOMAIN") {
        config.root_domain = root_domain;
    }
    if let Ok(port) = env::var("INTERNAL_PORT").ok().and_then(|v| v.parse().ok()) {
        config.internal_port = port;
    }
    if let Ok(count) = env::var("WORKER_COUNT").ok().and_then(|v| v.parse().ok()) {
        config.worker_count = count;
    }
    if let Ok(secs) = env::var("JOB_LEASE_SECONDS").ok().and_then(|v| v.parse().ok()) {
        config.job_lease_seconds = secs;
    }
    if let Ok(retries) = env::var("MAX_RETRIES").ok().and_then(|v| v.parse().ok()) {
        config.max_retries = retries;
    }
    if let Ok(secs) = env::var("BUILD_TIMEOUT_SECONDS").ok().and_then(|v| v.parse().ok()) {
        config.build_timeout = Duration::from_secs(secs);
    }
    if let Ok(secs) = env::var("SUPERVISOR_INTERVAL_SECONDS").ok().and_then(|v| v.parse().ok()) {
        config.supervisor_interval = Duration::from_secs(secs);
    }
    if let Ok(addr) = env::var("BIND_ADDRESS") {
        config.bind_address = addr;
    }

    // `plan_defaults` is code-defined per `spec.md` §3 ("not user-mutable");
    // environment overrides are limited to the operational knobs above.
    let _: &HashMap<String, PlanDefaults> = &config.plan_defaults;

    config
}

/// Resolves once either `SIGINT` or (on unix) `SIGTERM` is received, then
/// flips the shared shutdown signal workers and the Supervisor poll.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(config_from_env());
    info!(root_domain = %config.root_domain, worker_count = config.worker_count, "starting shipwrightd");

    let store: Arc<dyn Store> = Arc::new(PostgresStore::connect(&config.database_url).await?);
    let client = Arc::new(DockerClient::new().await?);
    let locks = Arc::new(AppLocks::new());

    let machine = Arc::new(DeploymentMachine::new(
        store.clone(),
        client.clone(),
        config.clone(),
        locks,
    ));
    let worker_pool = Arc::new(WorkerPool::new(store.clone(), machine, &config));
    let quota = QuotaEngine::new(store.clone(), config.clone());
    let api = Arc::new(PlatformApi::new(store.clone(), quota, worker_pool.clone(), config.clone()));

    let supervisor = Arc::new(shipwright::supervisor::Supervisor::new(store.clone(), client.clone(), &config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = tokio::spawn({
        let worker_pool = worker_pool.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { worker_pool.run(shutdown_rx).await }
    });

    let supervisor_handle = tokio::spawn({
        let supervisor = supervisor.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { supervisor.run(shutdown_rx).await }
    });

    let disable_loop_handle = tokio::spawn({
        let quota = shipwright::quota::QuotaEngine::new(store.clone(), config.clone());
        let shutdown_rx = shutdown_rx.clone();
        let interval = config.supervisor_interval;
        async move { quota.run_disable_loop(interval, shutdown_rx).await }
    });

    #[cfg(feature = "http")]
    let http_handle = {
        let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
        info!(addr = %config.bind_address, "illustrative HTTP adapter listening");
        let router = shipwright::api::http::router(api.clone());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let serve = axum::serve(listener, router);
            tokio::select! {
                result = serve => {
                    if let Err(err) = result {
                        warn!(error = %err, "http adapter exited with an error");
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        })
    };
    #[cfg(not(feature = "http"))]
    let _ = &api;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received; stopping worker claims and the supervisor");
    let _ = shutdown_tx.send(true);

    // Bounded grace window: in-flight jobs get a chance to finish; anything
    // still running at the deadline is abandoned and its lease will expire,
    // so another worker picks it back up on the next process's claim loop.
    let grace = Duration::from_secs(30);
    let _ = tokio::time::timeout(grace, worker_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), supervisor_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), disable_loop_handle).await;
    #[cfg(feature = "http")]
    let _ = tokio::time::timeout(Duration::from_secs(5), http_handle).await;

    info!("shipwrightd stopped");
    Ok(())
}
