//! Data model shared by the store, pipeline, and illustrative HTTP adapter.
//!
//! Nullable text fields are plain `Option<String>` and serialize as `null`
//! or a string, never as a two-field wrapper object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing status of a [`User`], as read (never written) by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// Trialing, not yet billed.
    Trial,
    /// Paying and current.
    Active,
    /// Billing lapsed; owned Apps are subject to the disable loop.
    Expired,
}

/// A platform account. Owned externally; the core only reads these rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Primary key.
    pub id: Uuid,
    /// Name of the Plan row this user is on.
    pub plan: String,
    /// Current billing status.
    pub billing_status: BillingStatus,
}

/// Lifecycle status of an [`App`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    /// Accepted, no Deployment has progressed past pending yet.
    Pending,
    /// A Deployment is building.
    Building,
    /// A Deployment is deploying (container starting, health probe in flight).
    Deploying,
    /// The App has a healthy running Deployment.
    Running,
    /// The App was stopped by explicit user action.
    Stopped,
    /// The most recent Deployment failed and was not retried.
    Failed,
    /// Disabled by the billing-expiry background loop; rejects all operations but delete.
    Disabled,
}

/// A user's deployable unit, identified globally by `slug`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct App {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Globally unique kebab-case identifier; becomes the public subdomain.
    pub slug: String,
    /// Git remote URL to clone.
    pub repo_url: String,
    /// Branch to check out.
    pub branch: String,
    /// Current status.
    pub status: AppStatus,
    /// Allocated RAM, in megabytes.
    pub ram_mb: i32,
    /// Allocated disk, in gigabytes.
    pub disk_gb: i32,
    /// Weak back-reference to the Deployment currently considered active.
    /// Tolerates pointing at a Deployment row that no longer exists; callers
    /// must treat that as "no active deployment" rather than an error.
    pub active_deployment_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a [`Deployment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Created by the HTTP layer, not yet claimed by a worker.
    Pending,
    /// Fetching and building an image.
    Building,
    /// Starting the container and waiting on its health probe.
    Deploying,
    /// Terminal: healthy and serving traffic.
    Running,
    /// Terminal: a pipeline step failed; see `error_message`.
    Failed,
    /// Terminal: stopped by explicit user action.
    Stopped,
}

impl DeploymentStatus {
    /// Non-terminal states count toward the at-most-one-in-flight invariant.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Running | Self::Failed | Self::Stopped)
    }
}

/// How a Deployment's listening port was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PortSource {
    /// A literal port number was found rather than a `PORT` reference.
    Hardcoded,
    /// The `PORT` environment variable contract was honored.
    Env,
    /// No port could be determined (e.g. a worker-tagged deployment).
    None,
}

/// A single attempt to build and run a version of an App's source.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployment {
    /// Primary key.
    pub id: Uuid,
    /// Owning App.
    pub app_id: Uuid,
    /// Current status.
    pub status: DeploymentStatus,
    /// Locally tagged image name once built, e.g. `<slug>:<deployment_id>`.
    pub image_tag: Option<String>,
    /// Container engine id once a container has been created.
    pub container_id: Option<String>,
    /// Public subdomain this Deployment serves, e.g. `<slug>.<root_domain>`.
    pub subdomain: String,
    /// Opaque reference used to look up the build log in the Log Pipeline.
    pub build_log_ref: Uuid,
    /// Opaque reference used to look up the runtime log in the Log Pipeline.
    pub runtime_log_ref: Uuid,
    /// Human-readable error detail, set on failure.
    pub error_message: Option<String>,
    /// Port detected by the Dockerfile Synthesizer's port detector.
    pub detected_port: Option<i32>,
    /// The fixed internal platform port the container is told to listen on.
    pub runtime_port: i32,
    /// How `detected_port` was determined.
    pub port_source: PortSource,
    /// Non-fatal warning attached when the port looks hardcoded.
    pub port_warning: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Observed resource usage and container identity for a running Deployment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuntimeInstance {
    /// Primary key.
    pub id: Uuid,
    /// Owning Deployment.
    pub deployment_id: Uuid,
    /// Container engine id.
    pub container_id: String,
    /// Container status as last observed by the Supervisor.
    pub status: String,
    /// Memory allocated to the container, in megabytes.
    pub allocated_memory_mb: i32,
    /// CPU share allocated to the container (Docker CPU-shares units).
    pub allocated_cpu_shares: i32,
    /// Disk allocated to the container, in gigabytes.
    pub allocated_disk_gb: i32,
    /// Memory usage last sampled by the Supervisor, in megabytes.
    pub memory_usage_mb: f64,
    /// Disk usage last sampled by the Supervisor, in gigabytes.
    pub disk_usage_gb: f64,
    /// Restart events observed by the Supervisor's container-engine polling.
    pub restart_count: i32,
    /// Last time the Supervisor updated this row; sole writer of usage fields.
    pub updated_at: DateTime<Utc>,
}

/// A single environment variable injected into an App's container at start.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnvVar {
    /// Owning App.
    pub app_id: Uuid,
    /// Variable name; unique per (app_id, key).
    pub key: String,
    /// Variable value, stored verbatim.
    pub value: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Which stream a [`LogChunk`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    /// Output of the Image Builder.
    Build,
    /// Output of the running container.
    Runtime,
}

/// An append-only slice of build or runtime log output.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogChunk {
    /// Primary key.
    pub id: Uuid,
    /// Owning App, for quota and retention sweeps.
    pub app_id: Uuid,
    /// Owning Deployment.
    pub deployment_id: Uuid,
    /// Which stream this chunk belongs to.
    pub log_type: LogType,
    /// Strictly increasing index per (deployment_id, log_type).
    pub chunk_index: i64,
    /// Raw chunk content, never larger than the configured ceiling.
    pub content: String,
    /// Byte length of `content`.
    pub size_bytes: i64,
    /// Creation timestamp; secondary ordering key alongside `chunk_index`.
    pub created_at: DateTime<Utc>,
}

/// Code-defined limits and feature flags for a plan name.
///
/// Mirrors [`crate::config::PlanDefaults`] but as a data-store row shape;
/// kept distinct because the store's Plan table is the seeded, queryable
/// source of truth at runtime while `PlanDefaults` is the seeding payload.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    /// Plan name, e.g. `free` or `pro`.
    pub name: String,
    /// Maximum number of Apps a user on this plan may own.
    pub max_apps: i32,
    /// Maximum combined RAM, in megabytes.
    pub max_ram_mb: i32,
    /// Maximum combined disk, in megabytes.
    pub max_disk_mb: i32,
    /// Whether worker-tagged deployments are permitted.
    pub workers: bool,
    /// Whether zero-downtime deploys are permitted.
    pub zero_downtime: bool,
}

/// Lifecycle status of a [`JobRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker and under lease.
    Running,
    /// Finished successfully.
    Completed,
    /// Exhausted its retries.
    Failed,
}

/// The kind of work a [`JobRecord`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Drive a Deployment through the pipeline.
    Deploy,
}

/// A durable queue entry, surviving process restart.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    /// Primary key; also the idempotency key workers dedupe on.
    pub job_id: Uuid,
    /// Kind of work this job represents.
    pub job_type: JobType,
    /// Job-type-specific payload, typically a Deployment id.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Number of times this job has been retried.
    pub retry_count: i32,
    /// Retry ceiling; exceeding it moves the job to `failed`.
    pub max_retries: i32,
    /// Last error recorded against this job, if any.
    pub error: Option<String>,
    /// Identifier of the worker holding the current lease, if any.
    pub claimed_by: Option<String>,
    /// When the current lease was taken out, if any.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}
