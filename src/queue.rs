//! Job Queue & Worker Pool: durable work distribution over [`crate::store::Store`]'s
//! job primitives, with lease renewal and graceful shutdown.
//!
//! The queue itself lives in the store (so a claim survives process
//! restart); this module is the worker loop that claims, drives, and
//! retires jobs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::deployment_machine::DeploymentMachine;
use crate::models::{JobRecord, JobStatus, JobType};
use crate::platform_error::{PlatformError, PlatformResult};
use crate::store::Store;

/// How long an idle worker backs off before polling the queue again.
const POLL_BACKOFF: Duration = Duration::from_millis(500);

/// Enqueues and drains `deploy` jobs against a [`DeploymentMachine`].
pub struct WorkerPool {
    store: Arc<dyn Store>,
    machine: Arc<DeploymentMachine>,
    worker_count: usize,
    lease_seconds: u64,
}

impl WorkerPool {
    /// Builds a `WorkerPool` against the platform's store and deployment machine.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, machine: Arc<DeploymentMachine>, config: &PlatformConfig) -> Self {
        Self {
            store,
            machine,
            worker_count: config.worker_count.max(1),
            lease_seconds: config.job_lease_seconds,
        }
    }

    /// The deployment machine this pool drains jobs into, exposed so callers
    /// (the API layer's `DeleteApp`) can reach its lock/cancellation registry.
    #[must_use]
    pub fn machine(&self) -> &Arc<DeploymentMachine> {
        &self.machine
    }

    /// Enqueues a `deploy` job for `deployment_id`, with `max_retries` drawn
    /// from the platform's transient-failure retry budget.
    pub async fn enqueue_deploy(&self, deployment_id: Uuid, max_retries: u32) -> PlatformResult<()> {
        let now = chrono::Utc::now();
        self.store
            .enqueue_job(JobRecord {
                job_id: Uuid::new_v4(),
                job_type: JobType::Deploy,
                payload: json!({ "deployment_id": deployment_id }),
                status: JobStatus::Queued,
                retry_count: 0,
                max_retries: max_retries as i32,
                error: None,
                claimed_by: None,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
    }

    /// Runs `worker_count` claim loops until `shutdown` resolves, then waits
    /// for any in-flight job each worker is holding to finish before returning.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let pid = std::process::id();
        let mut handles = Vec::with_capacity(self.worker_count);
        for index in 0..self.worker_count {
            let pool = self.clone();
            let worker_id = format!("worker-{pid}-{index}");
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, &mut shutdown).await;
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task panicked");
            }
        }
    }

    async fn worker_loop(&self, worker_id: String, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let claimed = match self.store.claim_job(&worker_id, self.lease_seconds).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    warn!(worker_id, error = %err, "failed to claim job");
                    None
                }
            };

            let Some(job) = claimed else {
                tokio::select! {
                    () = tokio::time::sleep(POLL_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };

            self.run_job(&worker_id, job).await;
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, worker_id))]
    async fn run_job(&self, worker_id: &str, job: JobRecord) {
        let JobType::Deploy = job.job_type;

        let Some(deployment_id) = job
            .payload
            .get("deployment_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            error!(job_id = %job.job_id, "deploy job payload missing a valid deployment_id; failing permanently");
            let _ = self.store.fail_job(job.job_id, "malformed job payload").await;
            return;
        };

        let renewal = self.spawn_lease_renewal(job.job_id, worker_id.to_string());
        let outcome = self.machine.run(deployment_id).await;
        renewal.abort();

        match outcome {
            Ok(()) => {
                if let Err(err) = self.store.complete_job(job.job_id).await {
                    warn!(job_id = %job.job_id, error = %err, "failed to mark job completed");
                }
            }
            Err(PlatformError::DeployLocked) => {
                // A sibling worker already holds the per-app lock; leave the
                // lease to expire so the job is reclaimed without burning a
                // retry, rather than recording this as a deployment failure.
                info!(job_id = %job.job_id, "deploy locked by a sibling worker; releasing for retry");
            }
            Err(err) if err.is_recoverable() => {
                info!(job_id = %job.job_id, error = %err, code = err.code(), "deploy job failed with a transient error; retrying within budget");
                if let Err(store_err) = self.store.fail_job(job.job_id, &err.to_string()).await {
                    warn!(job_id = %job.job_id, error = %store_err, "failed to record job failure");
                }
            }
            Err(err) => {
                info!(job_id = %job.job_id, error = %err, code = err.code(), "deploy job failed with a non-retryable error");
                if let Err(store_err) = self.store.fail_job_terminal(job.job_id, &err.to_string()).await {
                    warn!(job_id = %job.job_id, error = %store_err, "failed to record terminal job failure");
                }
            }
        }
    }

    fn spawn_lease_renewal(&self, job_id: Uuid, worker_id: String) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let lease_seconds = self.lease_seconds;
        let renewal_interval = Duration::from_secs(lease_seconds.max(2) / 2);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(renewal_interval).await;
                if let Err(err) = store.renew_lease(job_id, &worker_id, lease_seconds).await {
                    warn!(%job_id, error = %err, "failed to renew job lease");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DockerClient;
    use crate::config::PlatformConfig;
    use crate::deployment_machine::AppLocks;
    use crate::store::MemoryStore;

    async fn pool() -> Option<WorkerPool> {
        let config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let client = Arc::new(DockerClient::new().await.ok()?);
        let machine = Arc::new(DeploymentMachine::new(store.clone(), client, Arc::new(config.clone()), Arc::new(AppLocks::new())));
        Some(WorkerPool::new(store, machine, &config))
    }

    #[tokio::test]
    #[ignore = "Requires Docker daemon running"]
    async fn enqueue_deploy_round_trips_through_the_store() {
        let Some(pool) = pool().await else {
            println!("Docker not available, skipping test");
            return;
        };
        let deployment_id = Uuid::new_v4();
        pool.enqueue_deploy(deployment_id, 3).await.expect("enqueue");

        let claimed = pool
            .store
            .claim_job("test-worker", 60)
            .await
            .expect("claim")
            .expect("a job was queued");
        assert_eq!(claimed.job_type, JobType::Deploy);
        assert_eq!(claimed.payload["deployment_id"], json!(deployment_id));
    }
}
