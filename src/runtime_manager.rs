//! Runtime Manager: starts, stops, restarts, and removes the containers
//! backing a Deployment, with enforced resource caps and proxy labels.

use std::collections::HashMap;

use tracing::{info, instrument, warn};

use crate::client::DockerClient;
use crate::config::PlatformConfig;
use crate::container::health::{HealthChecker, HealthCheckConfig};
use crate::container::{ContainerConfig, HealthCheck as TypeHealthCheck};
use crate::detect::{PortSpec, RuntimeKind};
use crate::errors::DockerError;
use crate::image::ImageRef;
use crate::platform_error::{PlatformError, PlatformResult};
use crate::types::{ContainerId, ContainerStatus, RestartPolicy};

/// Label key the reverse proxy watches to route `<slug>.<root_domain>` to a container.
const PROXY_HOST_LABEL: &str = "shipwright.proxy.host";
/// Label key naming the internal port the proxy should forward to.
const PROXY_PORT_LABEL: &str = "shipwright.proxy.port";
/// Label marking a container as platform-managed, for crash-recovery sweeps.
const MANAGED_LABEL: &str = "shipwright.managed";

/// Drives container lifecycle for a single Deployment via the container engine.
pub struct RuntimeManager<'a> {
    client: &'a DockerClient,
    config: &'a PlatformConfig,
}

/// Outcome of starting a Deployment's container: the created container id
/// plus whether the startup health probe passed.
pub struct StartOutcome {
    /// Container engine id of the newly created container.
    pub container_id: String,
    /// Whether the configured health probe succeeded within the grace window.
    pub healthy: bool,
}

/// True if a command-execution failure looks like "no such container", the
/// only shape the CLI-backed container manager surfaces for a missing id.
fn looks_like_missing_container(err: &DockerError) -> bool {
    match err {
        DockerError::CommandFailed { stderr, .. } => {
            stderr.contains("No such container") || stderr.contains("no such container")
        }
        DockerError::ContainerNotFound { .. } | DockerError::ContainerNotRunning { .. } => true,
        _ => false,
    }
}

impl<'a> RuntimeManager<'a> {
    /// Builds a `RuntimeManager` against the platform's Docker client.
    #[must_use]
    pub fn new(client: &'a DockerClient, config: &'a PlatformConfig) -> Self {
        Self { client, config }
    }

    /// Creates and starts a container from `image_tag`, merging `PORT=<internal_port>`
    /// into `env_vars`, applying the app's resource caps, and registering proxy
    /// labels when `runtime_kind` is `Web`. Idempotent: a caller that already
    /// holds a live `container_id` should call `restart` instead.
    #[instrument(skip(self, env_vars), fields(%slug, ram_mb, disk_gb))]
    pub async fn start(
        &self,
        slug: &str,
        image_tag: &str,
        env_vars: HashMap<String, String>,
        ram_mb: i32,
        cpu_shares: i32,
        disk_gb: i32,
        runtime_kind: &RuntimeKind,
    ) -> PlatformResult<StartOutcome> {
        let mut environment = env_vars;
        environment.insert("PORT".to_string(), self.config.internal_port.to_string());

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), slug.to_string());
        if let RuntimeKind::Web(PortSpec { .. }) = runtime_kind {
            labels.insert(PROXY_HOST_LABEL.to_string(), self.config.subdomain_for(slug));
            labels.insert(PROXY_PORT_LABEL.to_string(), self.config.internal_port.to_string());
        }

        // Disk quota is enforced by the Supervisor comparing observed usage
        // against `allocated_disk_gb`, not by a container-create flag the
        // engine exposes directly.
        let _ = disk_gb;

        let container_config = ContainerConfig {
            image: image_tag.to_string(),
            name: Some(container_name(slug)),
            environment,
            labels,
            restart_policy: RestartPolicy::OnFailure {
                max_retries: Some(self.config.max_restarts_per_window),
            },
            health_check: Some(TypeHealthCheck::port(self.config.internal_port)),
            resource_limits: crate::types::ResourceLimits {
                memory: Some(u64::from(ram_mb.max(0) as u32) * 1024 * 1024),
                memory_swap: None,
                cpu_shares: Some(cpu_shares.max(0) as u64),
                cpu_quota: None,
                cpu_period: None,
                cpuset_cpus: None,
                pids_limit: None,
            },
            detached: true,
            ..Default::default()
        };

        let container_id = self
            .client
            .containers()
            .create_and_start(container_config)
            .await
            .map_err(PlatformError::from)?;

        // Two-phase readiness: the container must be observed running before
        // a health probe against its port means anything.
        let running = self
            .client
            .containers()
            .wait_for_ready(&container_id, self.config.health_probe_timeout)
            .await
            .is_ok();

        let healthy = running
            && HealthChecker::new(self.client)
                .wait_for_healthy(
                    &container_id,
                    TypeHealthCheck::port(self.config.internal_port),
                    HealthCheckConfig::new().timeout(self.config.health_probe_timeout),
                )
                .await
                .map(|result| result.healthy)
                .unwrap_or(false);

        if !healthy {
            warn!(%slug, "container did not become healthy within the startup grace window");
        }

        Ok(StartOutcome {
            container_id: container_id.to_string(),
            healthy,
        })
    }

    /// Stops a running container, sending graceful termination and forcing
    /// removal after the grace period elapses. A second call against an
    /// already-stopped or already-removed container is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self, container_id: &str) -> PlatformResult<()> {
        let id = ContainerId::new(container_id).map_err(PlatformError::from)?;
        match self.client.containers().stop(&id, Some(self.config.stop_grace_period)).await {
            Ok(()) => {}
            Err(err) if looks_like_missing_container(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        info!(container_id, "container stopped");
        Ok(())
    }

    /// Restarts a container in place (used after a Supervisor-detected crash
    /// within the retry budget, distinct from a full redeploy).
    #[instrument(skip(self))]
    pub async fn restart(&self, container_id: &str) -> PlatformResult<()> {
        let id = ContainerId::new(container_id).map_err(PlatformError::from)?;
        self.client
            .containers()
            .stop(&id, Some(self.config.stop_grace_period))
            .await
            .map_err(PlatformError::from)?;
        self.client.containers().start(&id).await.map_err(PlatformError::from)?;
        Ok(())
    }

    /// Removes a container and the image tagged for its deployment.
    #[instrument(skip(self))]
    pub async fn remove(&self, container_id: &str, image_tag: &str) -> PlatformResult<()> {
        let id = ContainerId::new(container_id).map_err(PlatformError::from)?;
        let remove_options = crate::container::RemoveOptions { force: true, ..Default::default() };
        if let Err(err) = self.client.containers().remove(&id, remove_options).await {
            if !looks_like_missing_container(&err) {
                return Err(err.into());
            }
        }

        let image_ref = ImageRef::parse(image_tag).map_err(PlatformError::from)?;
        if let Err(err) = self.client.images().remove(&image_ref, Default::default()).await {
            warn!(image_tag, error = %err, "failed to remove deployment image; leaving for manual cleanup");
        }
        Ok(())
    }

    /// Inspects a container's current status, used by the Deployment State
    /// Machine to decide whether to stop a previous Deployment's container.
    pub async fn status(&self, container_id: &str) -> PlatformResult<ContainerStatus> {
        let id = ContainerId::new(container_id).map_err(PlatformError::from)?;
        let container = self.client.containers().inspect(&id).await.map_err(PlatformError::from)?;
        Ok(container.status)
    }
}

fn container_name(slug: &str) -> String {
    format!("shipwright-{slug}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_namespaced_by_slug() {
        assert_eq!(container_name("my-app"), "shipwright-my-app");
    }

    #[test]
    fn command_failed_stderr_is_recognized_as_missing_container() {
        let err = DockerError::CommandFailed {
            command: "docker stop abc".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "Error: No such container: abc".to_string(),
        };
        assert!(looks_like_missing_container(&err));
    }
}
