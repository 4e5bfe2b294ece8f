//! Runtime configuration for the deployment pipeline.
//!
//! A single [`PlatformConfig`] is built once in `main` and threaded through
//! every component by reference or `Arc`. Nothing in this crate reaches for
//! a global or `lazy_static` — components that need configuration take it
//! as a constructor argument.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration recognized by the platform (see the external
/// interfaces section of the design: `root_domain`, `internal_port`, ...).
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Domain suffix used to compose `<slug>.<root_domain>` subdomains.
    pub root_domain: String,
    /// The fixed inside-container port the platform expects apps to bind.
    pub internal_port: u16,
    /// Number of worker pool tasks claiming jobs from the queue.
    pub worker_count: usize,
    /// How long a claimed job may run before its lease is considered expired.
    pub job_lease_seconds: u64,
    /// Maximum automatic retries for transient, platform-class failures.
    pub max_retries: u32,
    /// Wall-clock budget for an image build.
    pub build_timeout: Duration,
    /// Wall-clock budget for the startup health probe grace window.
    pub health_probe_timeout: Duration,
    /// Interval between Supervisor sampling ticks.
    pub supervisor_interval: Duration,
    /// Maximum size of a single persisted log chunk.
    pub log_chunk_bytes: usize,
    /// Age after which log chunks become eligible for pruning.
    pub log_retention: Duration,
    /// Root directory under which per-deployment working trees are created.
    pub workdir_root: PathBuf,
    /// Seed content for the Plan table, keyed by plan name.
    pub plan_defaults: HashMap<String, PlanDefaults>,
    /// Connection string for the relational data store.
    pub database_url: String,
    /// Address the illustrative HTTP adapter binds to.
    pub bind_address: String,
    /// Ceiling on checked-out repository size, in bytes.
    pub repo_size_limit_bytes: u64,
    /// Ceiling on built image size, in bytes.
    pub image_size_limit_bytes: u64,
    /// Grace period given to a container between SIGTERM and SIGKILL on stop.
    pub stop_grace_period: Duration,
    /// Restart-count threshold within `restart_window` that marks a runtime failed.
    pub max_restarts_per_window: u32,
    /// Rolling window over which restarts are counted.
    pub restart_window: Duration,
    /// Last N bytes of build output retained in memory for `error_message` attachment.
    pub build_log_tail_bytes: usize,
}

/// A single plan's limits and feature flags, as seeded into the Plan table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanDefaults {
    /// Maximum number of Apps a user on this plan may own.
    pub max_apps: u32,
    /// Maximum combined RAM, in megabytes, across a user's Apps.
    pub max_ram_mb: u32,
    /// Maximum combined disk, in megabytes, across a user's Apps.
    pub max_disk_mb: u32,
    /// Whether worker-tagged (non-web) deployments are permitted.
    pub workers: bool,
    /// Whether zero-downtime deploys are permitted (changes the 4.F strategy; not
    /// implemented by this core, so plans that set this reject deploys up front).
    pub zero_downtime: bool,
}

impl PlatformConfig {
    /// Builds a configuration with the platform's documented defaults, seeded
    /// with a single `free` plan. Callers override fields as needed before
    /// passing the config on; there is no implicit environment-variable reading
    /// here — that belongs to the binary entry point.
    #[must_use]
    pub fn with_defaults(database_url: impl Into<String>, workdir_root: impl Into<PathBuf>) -> Self {
        let mut plan_defaults = HashMap::new();
        plan_defaults.insert(
            "free".to_string(),
            PlanDefaults {
                max_apps: 1,
                max_ram_mb: 512,
                max_disk_mb: 1024,
                workers: false,
                zero_downtime: false,
            },
        );
        plan_defaults.insert(
            "pro".to_string(),
            PlanDefaults {
                max_apps: 20,
                max_ram_mb: 8192,
                max_disk_mb: 20480,
                workers: true,
                zero_downtime: false,
            },
        );

        Self {
            root_domain: "apps.localhost".to_string(),
            internal_port: 8080,
            worker_count: 4,
            job_lease_seconds: 120,
            max_retries: 3,
            build_timeout: Duration::from_secs(600),
            health_probe_timeout: Duration::from_secs(60),
            supervisor_interval: Duration::from_secs(15),
            log_chunk_bytes: 64 * 1024,
            log_retention: Duration::from_secs(14 * 24 * 3600),
            workdir_root: workdir_root.into(),
            plan_defaults,
            database_url: database_url.into(),
            bind_address: "0.0.0.0:3000".to_string(),
            repo_size_limit_bytes: 500 * 1024 * 1024,
            image_size_limit_bytes: 2 * 1024 * 1024 * 1024,
            stop_grace_period: Duration::from_secs(10),
            max_restarts_per_window: 5,
            restart_window: Duration::from_secs(300),
            build_log_tail_bytes: 16 * 1024,
        }
    }

    /// Working directory for a single deployment's checkout.
    #[must_use]
    pub fn deployment_workdir(&self, deployment_id: uuid::Uuid) -> PathBuf {
        self.workdir_root.join(format!("deployment-{deployment_id}"))
    }

    /// Public URL an App's slug resolves to under this configuration.
    #[must_use]
    pub fn subdomain_for(&self, slug: &str) -> String {
        format!("{slug}.{}", self.root_domain)
    }

    /// Looks up plan limits by name, falling back to the most restrictive
    /// seeded plan if the name is unrecognized (defensive against a stale
    /// plan name left on a User row after a Plan table edit).
    #[must_use]
    pub fn plan(&self, name: &str) -> PlanDefaults {
        self.plan_defaults.get(name).cloned().unwrap_or(PlanDefaults {
            max_apps: 0,
            max_ram_mb: 0,
            max_disk_mb: 0,
            workers: false,
            zero_downtime: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_workdir_is_keyed_by_id() {
        let cfg = PlatformConfig::with_defaults("postgres://x", "/var/lib/platform");
        let id = uuid::Uuid::nil();
        assert_eq!(
            cfg.deployment_workdir(id),
            PathBuf::from("/var/lib/platform/deployment-00000000-0000-0000-0000-000000000000")
        );
    }

    #[test]
    fn unknown_plan_name_resolves_to_zero_limits() {
        let cfg = PlatformConfig::with_defaults("postgres://x", "/tmp");
        let plan = cfg.plan("nonexistent");
        assert_eq!(plan.max_apps, 0);
    }

    #[test]
    fn subdomain_composition_matches_root_domain() {
        let cfg = PlatformConfig::with_defaults("postgres://x", "/tmp");
        assert_eq!(cfg.subdomain_for("my-app"), "my-app.apps.localhost");
    }
}
