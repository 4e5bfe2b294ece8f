//! In-memory [`Store`] used by unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    App, AppStatus, BillingStatus, Deployment, DeploymentStatus, EnvVar, JobRecord, JobStatus,
    LogChunk, LogType, Plan, RuntimeInstance, User,
};
use crate::platform_error::{PlatformError, PlatformResult};

use super::{Store, UsageTotals};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    apps: HashMap<Uuid, App>,
    deployments: HashMap<Uuid, Deployment>,
    runtime_instances: HashMap<Uuid, RuntimeInstance>,
    env_vars: HashMap<(Uuid, String), EnvVar>,
    log_chunks: Vec<LogChunk>,
    plans: HashMap<String, Plan>,
    jobs: HashMap<Uuid, JobRecord>,
}

/// A `Mutex`-guarded in-memory store. Not for production use; it exists so
/// that pipeline components and their tests do not need a live Postgres
/// instance, the same way the container engine's `testing` seam let callers
/// substitute a fake Docker client.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Seeds a User row directly, bypassing the (external) user-creation path.
    pub fn seed_user(&self, user: User) {
        self.tables.lock().unwrap().users.insert(user.id, user);
    }

    /// Seeds a Plan row directly.
    pub fn seed_plan(&self, plan: Plan) {
        self.tables.lock().unwrap().plans.insert(plan.name.clone(), plan);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: Uuid) -> PlatformResult<Option<User>> {
        Ok(self.tables.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn users_with_expired_billing(&self) -> PlatformResult<Vec<User>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.billing_status == crate::models::BillingStatus::Expired)
            .cloned()
            .collect())
    }

    async fn usage_totals(&self, user_id: Uuid) -> PlatformResult<UsageTotals> {
        let tables = self.tables.lock().unwrap();
        let mut totals = UsageTotals::default();
        for app in tables.apps.values() {
            if app.user_id != user_id || app.status == AppStatus::Disabled {
                continue;
            }
            totals.app_count += 1;
            totals.ram_mb += app.ram_mb.max(0) as u32;
            totals.disk_mb += app.disk_gb.max(0) as u32 * 1024;
        }
        Ok(totals)
    }

    async fn create_app(&self, app: App) -> PlatformResult<App> {
        let mut tables = self.tables.lock().unwrap();
        if tables.apps.values().any(|existing| existing.slug == app.slug) {
            return Err(PlatformError::Store(format!("slug already taken: {}", app.slug)));
        }
        tables.apps.insert(app.id, app.clone());
        Ok(app)
    }

    async fn get_app(&self, app_id: Uuid) -> PlatformResult<Option<App>> {
        Ok(self.tables.lock().unwrap().apps.get(&app_id).cloned())
    }

    async fn get_app_by_slug(&self, slug: &str) -> PlatformResult<Option<App>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .apps
            .values()
            .find(|app| app.slug == slug)
            .cloned())
    }

    async fn list_apps(&self, user_id: Uuid) -> PlatformResult<Vec<App>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .apps
            .values()
            .filter(|app| app.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_app(&self, app: App) -> PlatformResult<()> {
        self.tables.lock().unwrap().apps.insert(app.id, app);
        Ok(())
    }

    async fn delete_app(&self, app_id: Uuid) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.apps.remove(&app_id);
        let deployment_ids: Vec<Uuid> = tables
            .deployments
            .values()
            .filter(|d| d.app_id == app_id)
            .map(|d| d.id)
            .collect();
        for id in &deployment_ids {
            tables.deployments.remove(id);
            tables.runtime_instances.retain(|_, instance| instance.deployment_id != *id);
        }
        tables.env_vars.retain(|(owner, _), _| *owner != app_id);
        tables.log_chunks.retain(|chunk| chunk.app_id != app_id);
        Ok(())
    }

    async fn create_deployment(&self, deployment: Deployment) -> PlatformResult<Deployment> {
        let mut tables = self.tables.lock().unwrap();
        tables.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn get_deployment(&self, deployment_id: Uuid) -> PlatformResult<Option<Deployment>> {
        Ok(self.tables.lock().unwrap().deployments.get(&deployment_id).cloned())
    }

    async fn list_deployments(&self, app_id: Uuid) -> PlatformResult<Vec<Deployment>> {
        let mut deployments: Vec<Deployment> = self
            .tables
            .lock()
            .unwrap()
            .deployments
            .values()
            .filter(|d| d.app_id == app_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    async fn active_non_terminal_deployment(&self, app_id: Uuid) -> PlatformResult<Option<Deployment>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .deployments
            .values()
            .find(|d| d.app_id == app_id && !d.status.is_terminal())
            .cloned())
    }

    async fn update_deployment(&self, deployment: Deployment) -> PlatformResult<()> {
        self.tables.lock().unwrap().deployments.insert(deployment.id, deployment);
        Ok(())
    }

    async fn put_runtime_instance(&self, instance: RuntimeInstance) -> PlatformResult<()> {
        self.tables.lock().unwrap().runtime_instances.insert(instance.id, instance);
        Ok(())
    }

    async fn get_runtime_instance(&self, deployment_id: Uuid) -> PlatformResult<Option<RuntimeInstance>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .runtime_instances
            .values()
            .find(|instance| instance.deployment_id == deployment_id)
            .cloned())
    }

    async fn runtime_instances_to_supervise(&self) -> PlatformResult<Vec<RuntimeInstance>> {
        Ok(self.tables.lock().unwrap().runtime_instances.values().cloned().collect())
    }

    async fn set_env_var(&self, env_var: EnvVar) -> PlatformResult<()> {
        self.tables
            .lock()
            .unwrap()
            .env_vars
            .insert((env_var.app_id, env_var.key.clone()), env_var);
        Ok(())
    }

    async fn delete_env_var(&self, app_id: Uuid, key: &str) -> PlatformResult<()> {
        self.tables.lock().unwrap().env_vars.remove(&(app_id, key.to_string()));
        Ok(())
    }

    async fn list_env_vars(&self, app_id: Uuid) -> PlatformResult<Vec<EnvVar>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .env_vars
            .values()
            .filter(|env| env.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn append_log_chunk(&self, chunk: LogChunk) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let expected = tables
            .log_chunks
            .iter()
            .filter(|c| c.deployment_id == chunk.deployment_id && c.log_type == chunk.log_type)
            .count() as i64;
        if chunk.chunk_index != expected {
            return Err(PlatformError::Store(format!(
                "out-of-order chunk_index: expected {expected}, got {}",
                chunk.chunk_index
            )));
        }
        tables.log_chunks.push(chunk);
        Ok(())
    }

    async fn get_log_chunks(
        &self,
        deployment_id: Uuid,
        log_type: LogType,
        offset: i64,
        limit: i64,
    ) -> PlatformResult<Vec<LogChunk>> {
        let tables = self.tables.lock().unwrap();
        let mut chunks: Vec<LogChunk> = tables
            .log_chunks
            .iter()
            .filter(|c| c.deployment_id == deployment_id && c.log_type == log_type)
            .cloned()
            .collect();
        chunks.sort_by(|a, b| a.chunk_index.cmp(&b.chunk_index).then(a.created_at.cmp(&b.created_at)));
        Ok(chunks
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn next_chunk_index(&self, deployment_id: Uuid, log_type: LogType) -> PlatformResult<i64> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .log_chunks
            .iter()
            .filter(|c| c.deployment_id == deployment_id && c.log_type == log_type)
            .count() as i64)
    }

    async fn prune_log_chunks(&self, older_than: chrono::DateTime<chrono::Utc>) -> PlatformResult<u64> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.log_chunks.len();
        tables.log_chunks.retain(|chunk| chunk.created_at >= older_than);
        Ok((before - tables.log_chunks.len()) as u64)
    }

    async fn get_plan(&self, name: &str) -> PlatformResult<Option<Plan>> {
        Ok(self.tables.lock().unwrap().plans.get(name).cloned())
    }

    async fn enqueue_job(&self, job: JobRecord) -> PlatformResult<()> {
        self.tables.lock().unwrap().jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn claim_job(&self, worker_id: &str, lease_seconds: u64) -> PlatformResult<Option<JobRecord>> {
        let mut tables = self.tables.lock().unwrap();
        let now = Utc::now();
        let lease_expired = |job: &JobRecord| {
            job.claimed_at
                .map(|claimed_at| now - claimed_at > chrono::Duration::seconds(lease_seconds as i64))
                .unwrap_or(true)
        };
        let claimable_id = tables
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Queued || (job.status == JobStatus::Running && lease_expired(job))
            })
            .min_by_key(|job| job.created_at)
            .map(|job| job.job_id);

        let Some(job_id) = claimable_id else {
            return Ok(None);
        };
        let job = tables.jobs.get_mut(&job_id).expect("just located by id");
        job.status = JobStatus::Running;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, job_id: Uuid) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(job) = tables.jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> PlatformResult<JobStatus> {
        let mut tables = self.tables.lock().unwrap();
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| PlatformError::Store(format!("no such job: {job_id}")))?;
        job.error = Some(error.to_string());
        job.updated_at = Utc::now();
        if job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.status = JobStatus::Queued;
            job.claimed_by = None;
            job.claimed_at = None;
        } else {
            job.status = JobStatus::Failed;
        }
        Ok(job.status)
    }

    async fn fail_job_terminal(&self, job_id: Uuid, error: &str) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| PlatformError::Store(format!("no such job: {job_id}")))?;
        job.error = Some(error.to_string());
        job.status = JobStatus::Failed;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn renew_lease(&self, job_id: Uuid, worker_id: &str, _lease_seconds: u64) -> PlatformResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| PlatformError::Store(format!("no such job: {job_id}")))?;
        if job.claimed_by.as_deref() != Some(worker_id) {
            return Err(PlatformError::Store("lease not held by this worker".to_string()));
        }
        job.claimed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobType, PortSource};

    fn sample_app(slug: &str) -> App {
        let now = Utc::now();
        App {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "demo".to_string(),
            slug: slug.to_string(),
            repo_url: "https://example.com/demo.git".to_string(),
            branch: "main".to_string(),
            status: AppStatus::Pending,
            ram_mb: 512,
            disk_gb: 1,
            active_deployment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected_before_any_side_effect() {
        let store = MemoryStore::new();
        store.create_app(sample_app("demo")).await.unwrap();
        let err = store.create_app(sample_app("demo")).await.unwrap_err();
        assert!(matches!(err, PlatformError::Store(_)));
        assert_eq!(store.list_apps(Uuid::nil()).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn deleting_an_app_cascades_to_children() {
        let store = MemoryStore::new();
        let app = store.create_app(sample_app("demo")).await.unwrap();
        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4(),
            app_id: app.id,
            status: DeploymentStatus::Running,
            image_tag: Some("demo:1".to_string()),
            container_id: Some("c1".to_string()),
            subdomain: "demo.apps.localhost".to_string(),
            build_log_ref: Uuid::new_v4(),
            runtime_log_ref: Uuid::new_v4(),
            error_message: None,
            detected_port: Some(3000),
            runtime_port: 8080,
            port_source: PortSource::Env,
            port_warning: None,
            created_at: now,
            updated_at: now,
        };
        store.create_deployment(deployment.clone()).await.unwrap();
        store
            .set_env_var(EnvVar {
                app_id: app.id,
                key: "FOO".to_string(),
                value: "bar".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        store.delete_app(app.id).await.unwrap();

        assert!(store.get_app(app.id).await.unwrap().is_none());
        assert!(store.get_deployment(deployment.id).await.unwrap().is_none());
        assert_eq!(store.list_env_vars(app.id).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn out_of_order_chunk_index_is_rejected() {
        let store = MemoryStore::new();
        let deployment_id = Uuid::new_v4();
        let bad = LogChunk {
            id: Uuid::new_v4(),
            app_id: Uuid::new_v4(),
            deployment_id,
            log_type: LogType::Build,
            chunk_index: 1,
            content: "oops".to_string(),
            size_bytes: 4,
            created_at: Utc::now(),
        };
        let err = store.append_log_chunk(bad).await.unwrap_err();
        assert!(matches!(err, PlatformError::Store(_)));
    }

    #[tokio::test]
    async fn job_claim_is_exclusive_until_completed() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let job = JobRecord {
            job_id: Uuid::new_v4(),
            job_type: JobType::Deploy,
            payload: serde_json::json!({ "deployment_id": Uuid::new_v4() }),
            status: JobStatus::Queued,
            retry_count: 0,
            max_retries: 3,
            error: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        store.enqueue_job(job.clone()).await.unwrap();

        let claimed = store.claim_job("worker-1", 60).await.unwrap().unwrap();
        assert_eq!(claimed.job_id, job.job_id);
        assert!(store.claim_job("worker-2", 60).await.unwrap().is_none());

        store.complete_job(job.job_id).await.unwrap();
    }

    #[tokio::test]
    async fn fail_job_requeues_within_budget_then_fails_once_retries_are_exhausted() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let job = JobRecord {
            job_id: Uuid::new_v4(),
            job_type: JobType::Deploy,
            payload: serde_json::json!({ "deployment_id": Uuid::new_v4() }),
            status: JobStatus::Queued,
            retry_count: 0,
            max_retries: 1,
            error: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        store.enqueue_job(job.clone()).await.unwrap();

        let status = store.fail_job(job.job_id, "transient").await.unwrap();
        assert_eq!(status, JobStatus::Queued);
        assert!(store.claim_job("worker-1", 60).await.unwrap().is_some());

        let status = store.fail_job(job.job_id, "transient again").await.unwrap();
        assert_eq!(status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn fail_job_terminal_skips_the_retry_budget_entirely() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let job = JobRecord {
            job_id: Uuid::new_v4(),
            job_type: JobType::Deploy,
            payload: serde_json::json!({ "deployment_id": Uuid::new_v4() }),
            status: JobStatus::Queued,
            retry_count: 0,
            max_retries: 5,
            error: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        store.enqueue_job(job.clone()).await.unwrap();

        store.fail_job_terminal(job.job_id, "not recoverable").await.unwrap();
        assert!(store.claim_job("worker-1", 60).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn users_with_expired_billing_excludes_active_users() {
        let store = MemoryStore::new();
        let active = User {
            id: Uuid::new_v4(),
            plan: "free".to_string(),
            billing_status: BillingStatus::Active,
        };
        let expired = User {
            id: Uuid::new_v4(),
            plan: "pro".to_string(),
            billing_status: BillingStatus::Expired,
        };
        store.seed_user(active);
        store.seed_user(expired.clone());

        let lapsed = store.users_with_expired_billing().await.unwrap();
        assert_eq!(lapsed.len(), 1);
        assert_eq!(lapsed[0].id, expired.id);
    }
}
