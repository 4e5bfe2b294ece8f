//! Supervisor & Metrics Sampler: the sole writer of `RuntimeInstance` usage
//! fields, and the detector of crash loops that retire a Deployment.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::DockerClient;
use crate::config::PlatformConfig;
use crate::models::{AppStatus, DeploymentStatus};
use crate::platform_error::PlatformResult;
use crate::store::Store;
use crate::types::{ContainerId, ContainerStatus};

/// Polls every `RuntimeInstance` the store considers supervisable on a fixed
/// interval, updating observed usage and detecting crash loops.
pub struct Supervisor {
    store: Arc<dyn Store>,
    client: Arc<DockerClient>,
    interval: Duration,
    restart_threshold: u32,
    restart_window: Duration,
    /// Restart timestamps observed per `RuntimeInstance`, pruned to
    /// `restart_window` on every tick. Process-local: a crash loop is judged
    /// against restarts this Supervisor has itself witnessed, not the
    /// lifetime cumulative count persisted on the row.
    restart_events: Mutex<HashMap<Uuid, VecDeque<DateTime<Utc>>>>,
}

impl Supervisor {
    /// Builds a Supervisor against the platform's store and container client.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, client: Arc<DockerClient>, config: &PlatformConfig) -> Self {
        Self {
            store,
            client,
            interval: config.supervisor_interval,
            restart_threshold: config.max_restarts_per_window,
            restart_window: config.restart_window,
            restart_events: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the sampling loop until `shutdown` resolves. Intended to be
    /// spawned as its own long-lived task by the binary entry point.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "supervisor tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("supervisor shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Samples every supervisable `RuntimeInstance` once.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> PlatformResult<()> {
        let instances = self.store.runtime_instances_to_supervise().await?;
        for mut instance in instances {
            let container_id = match ContainerId::new(&instance.container_id) {
                Ok(id) => id,
                Err(err) => {
                    warn!(deployment_id = %instance.deployment_id, error = %err, "invalid container id on runtime instance");
                    continue;
                }
            };

            let container = match self.client.containers().inspect(&container_id).await {
                Ok(container) => container,
                Err(err) => {
                    warn!(deployment_id = %instance.deployment_id, error = %err, "failed to inspect supervised container");
                    continue;
                }
            };

            let restarted = matches!(container.status, ContainerStatus::Restarting);
            if restarted {
                instance.restart_count += 1;
            }

            if let Ok(stats) = self.client.stats().get_stats(&container_id).await {
                instance.memory_usage_mb = stats.memory_usage_mb();
            }
            if let Ok(disk_bytes) = self.client.containers().disk_usage_bytes(&container_id).await {
                instance.disk_usage_gb = disk_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
            }

            instance.status = container_status_label(&container.status);
            instance.updated_at = Utc::now();

            let restarts_in_window = self.record_restart_and_count(instance.id, restarted).await;
            let crashed = restarts_in_window >= self.restart_threshold;
            let disk_exceeded = instance.disk_usage_gb > f64::from(instance.allocated_disk_gb);
            self.store.put_runtime_instance(instance.clone()).await?;

            if crashed {
                self.mark_failed(instance.deployment_id, "restart threshold exceeded within the supervision window").await?;
            } else if disk_exceeded {
                self.mark_failed(instance.deployment_id, "disk usage exceeded the allocated quota").await?;
            }
        }
        Ok(())
    }

    /// Records a restart observation (if any) for `instance_id`, prunes
    /// events older than `restart_window`, and returns the remaining count —
    /// the rolling-window tally §4.E's crash-loop threshold is judged against.
    async fn record_restart_and_count(&self, instance_id: Uuid, restarted: bool) -> u32 {
        let mut events = self.restart_events.lock().await;
        let window = events.entry(instance_id).or_default();

        if restarted {
            window.push_back(Utc::now());
        }

        let window_delta = chrono::Duration::from_std(self.restart_window).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - window_delta;
        while window.front().is_some_and(|ts| *ts < cutoff) {
            window.pop_front();
        }

        window.len() as u32
    }

    async fn mark_failed(&self, deployment_id: uuid::Uuid, reason: &str) -> PlatformResult<()> {
        let Some(mut deployment) = self.store.get_deployment(deployment_id).await? else {
            return Ok(());
        };
        if deployment.status.is_terminal() {
            return Ok(());
        }
        warn!(%deployment_id, reason, "marking deployment failed");
        deployment.status = DeploymentStatus::Failed;
        deployment.error_message = Some(reason.to_string());
        deployment.updated_at = Utc::now();
        self.store.update_deployment(deployment.clone()).await?;

        if let Some(mut app) = self.store.get_app(deployment.app_id).await? {
            app.status = AppStatus::Failed;
            app.updated_at = Utc::now();
            self.store.update_app(app).await?;
        }
        Ok(())
    }
}

fn container_status_label(status: &ContainerStatus) -> String {
    match status {
        ContainerStatus::Created => "created".to_string(),
        ContainerStatus::Running { .. } => "running".to_string(),
        ContainerStatus::Paused => "paused".to_string(),
        ContainerStatus::Restarting => "restarting".to_string(),
        ContainerStatus::Exited { .. } => "exited".to_string(),
        ContainerStatus::Dead => "dead".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{App, AppStatus, Deployment, DeploymentStatus};
    use crate::store::{MemoryStore, Store};
    use uuid::Uuid;

    #[test]
    fn restarting_status_labels_as_restarting() {
        assert_eq!(container_status_label(&ContainerStatus::Restarting), "restarting");
    }

    #[tokio::test]
    async fn restart_window_prunes_events_older_than_the_configured_window() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let Some(mut supervisor) = supervisor_over(store).await else {
            println!("Docker not available, skipping test");
            return;
        };
        supervisor.restart_window = Duration::from_millis(20);
        let instance_id = Uuid::new_v4();

        let first = supervisor.record_restart_and_count(instance_id, true).await;
        assert_eq!(first, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let after_window = supervisor.record_restart_and_count(instance_id, false).await;
        assert_eq!(after_window, 0, "the earlier restart should have aged out of the window");
    }

    #[tokio::test]
    async fn restart_window_counts_accumulate_within_the_window() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let Some(supervisor) = supervisor_over(store).await else {
            println!("Docker not available, skipping test");
            return;
        };
        let instance_id = Uuid::new_v4();

        assert_eq!(supervisor.record_restart_and_count(instance_id, true).await, 1);
        assert_eq!(supervisor.record_restart_and_count(instance_id, true).await, 2);
        assert_eq!(supervisor.record_restart_and_count(instance_id, false).await, 2);
    }

    async fn supervisor_over(store: Arc<dyn Store>) -> Option<Supervisor> {
        let client = Arc::new(DockerClient::new().await.ok()?);
        let config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        Some(Supervisor::new(store, client, &config))
    }

    #[tokio::test]
    async fn mark_failed_retires_both_the_deployment_and_its_app() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let Some(supervisor) = supervisor_over(store.clone()).await else {
            println!("Docker not available, skipping test");
            return;
        };

        let user_id = Uuid::new_v4();
        let app = App {
            id: Uuid::new_v4(),
            user_id,
            name: "crash-loop".to_string(),
            slug: "crash-loop".to_string(),
            repo_url: "https://example.invalid/repo.git".to_string(),
            branch: "main".to_string(),
            status: AppStatus::Running,
            ram_mb: 512,
            disk_gb: 1,
            active_deployment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.create_app(app.clone()).await.unwrap();

        let deployment = Deployment {
            id: Uuid::new_v4(),
            app_id: app.id,
            status: DeploymentStatus::Running,
            image_tag: None,
            container_id: None,
            subdomain: "crash-loop.example.invalid".to_string(),
            build_log_ref: Uuid::new_v4(),
            runtime_log_ref: Uuid::new_v4(),
            error_message: None,
            detected_port: None,
            runtime_port: 8080,
            port_source: crate::models::PortSource::None,
            port_warning: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.create_deployment(deployment.clone()).await.unwrap();

        supervisor.mark_failed(deployment.id, "disk usage exceeded the allocated quota").await.unwrap();

        let reloaded = store.get_deployment(deployment.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, DeploymentStatus::Failed);
        assert_eq!(reloaded.error_message.as_deref(), Some("disk usage exceeded the allocated quota"));

        let reloaded_app = store.get_app(app.id).await.unwrap().unwrap();
        assert_eq!(reloaded_app.status, AppStatus::Failed);

        // Already-terminal deployments are left alone on a second call.
        supervisor.mark_failed(deployment.id, "a later reason").await.unwrap();
        let unchanged = store.get_deployment(deployment.id).await.unwrap().unwrap();
        assert_eq!(unchanged.error_message.as_deref(), Some("disk usage exceeded the allocated quota"));
    }
}
