//! The data store seam: a trait plus a Postgres-backed implementation and an
//! in-memory implementation used by tests.
//!
//! Every component in this crate that touches persisted state does so
//! through [`Store`] rather than holding a `sqlx::Pool` directly, mirroring
//! the way the container engine's managers are built against `DockerClient`
//! rather than spawning subprocesses themselves.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{App, Deployment, EnvVar, JobRecord, JobStatus, LogChunk, LogType, Plan, RuntimeInstance, User};
use crate::platform_error::PlatformResult;

/// A page of deployments, newest first, as returned to the external HTTP layer.
pub type Deployments = Vec<Deployment>;

/// Aggregate resource usage across a user's Apps, for quota checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    /// Number of Apps the user currently owns (disposition of the disabled-app
    /// open question: excluded here, see `DESIGN.md`).
    pub app_count: u32,
    /// Sum of `ram_mb` across the user's Apps.
    pub ram_mb: u32,
    /// Sum of `disk_gb` across the user's Apps, expressed in megabytes.
    pub disk_mb: u32,
}

/// Everything the deployment pipeline needs from the relational data store.
///
/// Methods are named after the operation they perform rather than after SQL
/// verbs, so that the in-memory test double and the Postgres implementation
/// read the same at call sites.
#[async_trait]
pub trait Store: Send + Sync {
    /// Looks up a User by id.
    async fn get_user(&self, user_id: Uuid) -> PlatformResult<Option<User>>;

    /// Lists every User whose billing has lapsed, for the billing-expiry
    /// disable loop. Ordering is unspecified.
    async fn users_with_expired_billing(&self) -> PlatformResult<Vec<User>>;

    /// Returns aggregate resource usage for a user's non-disabled Apps.
    async fn usage_totals(&self, user_id: Uuid) -> PlatformResult<UsageTotals>;

    /// Inserts a new App row. Fails with a store error (surfaced by the
    /// caller as a conflict) if `slug` is already taken.
    async fn create_app(&self, app: App) -> PlatformResult<App>;

    /// Looks up an App by id.
    async fn get_app(&self, app_id: Uuid) -> PlatformResult<Option<App>>;

    /// Looks up an App by slug, used for the global-uniqueness pre-check.
    async fn get_app_by_slug(&self, slug: &str) -> PlatformResult<Option<App>>;

    /// Lists a user's Apps.
    async fn list_apps(&self, user_id: Uuid) -> PlatformResult<Vec<App>>;

    /// Replaces an App row in full.
    async fn update_app(&self, app: App) -> PlatformResult<()>;

    /// Deletes an App and cascades to its Deployments, RuntimeInstances,
    /// EnvVars, and LogChunks.
    async fn delete_app(&self, app_id: Uuid) -> PlatformResult<()>;

    /// Inserts a new Deployment row.
    async fn create_deployment(&self, deployment: Deployment) -> PlatformResult<Deployment>;

    /// Looks up a Deployment by id.
    async fn get_deployment(&self, deployment_id: Uuid) -> PlatformResult<Option<Deployment>>;

    /// Lists an App's Deployments ordered by `created_at` descending.
    async fn list_deployments(&self, app_id: Uuid) -> PlatformResult<Deployments>;

    /// Returns the App's Deployment currently in a non-terminal status, if any.
    /// Used to enforce "at most one in-flight Deployment per App".
    async fn active_non_terminal_deployment(&self, app_id: Uuid) -> PlatformResult<Option<Deployment>>;

    /// Replaces a Deployment row in full.
    async fn update_deployment(&self, deployment: Deployment) -> PlatformResult<()>;

    /// Upserts the RuntimeInstance for a Deployment.
    async fn put_runtime_instance(&self, instance: RuntimeInstance) -> PlatformResult<()>;

    /// Looks up the RuntimeInstance for a Deployment.
    async fn get_runtime_instance(&self, deployment_id: Uuid) -> PlatformResult<Option<RuntimeInstance>>;

    /// Lists every RuntimeInstance the Supervisor should poll this tick.
    async fn runtime_instances_to_supervise(&self) -> PlatformResult<Vec<RuntimeInstance>>;

    /// Inserts or overwrites a single environment variable.
    async fn set_env_var(&self, env_var: EnvVar) -> PlatformResult<()>;

    /// Removes a single environment variable; a no-op if it does not exist.
    async fn delete_env_var(&self, app_id: Uuid, key: &str) -> PlatformResult<()>;

    /// Lists an App's environment variables.
    async fn list_env_vars(&self, app_id: Uuid) -> PlatformResult<Vec<EnvVar>>;

    /// Appends a log chunk. The caller is responsible for assigning a
    /// strictly increasing `chunk_index`; implementations reject an
    /// out-of-order or duplicate index.
    async fn append_log_chunk(&self, chunk: LogChunk) -> PlatformResult<()>;

    /// Reads log chunks for a Deployment's stream in index order.
    async fn get_log_chunks(
        &self,
        deployment_id: Uuid,
        log_type: LogType,
        offset: i64,
        limit: i64,
    ) -> PlatformResult<Vec<LogChunk>>;

    /// Returns the next `chunk_index` to use for a (deployment, log_type) pair.
    async fn next_chunk_index(&self, deployment_id: Uuid, log_type: LogType) -> PlatformResult<i64>;

    /// Deletes log chunks older than the retention horizon.
    async fn prune_log_chunks(&self, older_than: chrono::DateTime<chrono::Utc>) -> PlatformResult<u64>;

    /// Looks up plan limits by name.
    async fn get_plan(&self, name: &str) -> PlatformResult<Option<Plan>>;

    /// Pushes a new job in `queued` status.
    async fn enqueue_job(&self, job: JobRecord) -> PlatformResult<()>;

    /// Atomically claims the oldest `queued` job (or a `running` job whose
    /// lease has expired), transitioning it to `running` under a fresh lease
    /// held by `worker_id`. Returns `None` if nothing is claimable.
    async fn claim_job(&self, worker_id: &str, lease_seconds: u64) -> PlatformResult<Option<JobRecord>>;

    /// Marks a job completed.
    async fn complete_job(&self, job_id: Uuid) -> PlatformResult<()>;

    /// Marks a job failed: requeues with `retry_count` incremented if under
    /// `max_retries`, otherwise transitions to terminal `failed`.
    async fn fail_job(&self, job_id: Uuid, error: &str) -> PlatformResult<JobStatus>;

    /// Marks a job failed permanently, bypassing the retry budget. Used for
    /// error codes the platform does not consider transient — only
    /// `PlatformError::is_recoverable` codes go through `fail_job`'s retry path.
    async fn fail_job_terminal(&self, job_id: Uuid, error: &str) -> PlatformResult<()>;

    /// Periodically renews the lease on a job still being worked, so a long
    /// build does not get reclaimed by another worker mid-flight.
    async fn renew_lease(&self, job_id: Uuid, worker_id: &str, lease_seconds: u64) -> PlatformResult<()>;
}
