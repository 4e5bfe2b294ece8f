//! Postgres-backed [`Store`] implementation.
//!
//! Queries are written with `sqlx::query_as`/`query` rather than the `query!`
//! compile-time macros: the macros need a live database reachable at build
//! time, which this crate should not require just to compile.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    App, Deployment, EnvVar, JobRecord, JobStatus, LogChunk, LogType, Plan, RuntimeInstance, User,
};
use crate::platform_error::{PlatformError, PlatformResult};

use super::{Store, UsageTotals};

/// A `Store` backed by a Postgres connection pool.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to `database_url` with a small pool, suitable for a single
    /// `shipwrightd` process (the worker pool shares this one pool).
    pub async fn connect(database_url: &str) -> PlatformResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| PlatformError::Store(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Runs pending migrations embedded in `migrations/`.
    pub async fn migrate(&self) -> PlatformResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PlatformError::Store(e.to_string()))
    }
}

fn store_err(e: sqlx::Error) -> PlatformError {
    PlatformError::Store(e.to_string())
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_user(&self, user_id: Uuid) -> PlatformResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT id, plan, billing_status FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn users_with_expired_billing(&self) -> PlatformResult<Vec<User>> {
        sqlx::query_as::<_, User>("SELECT id, plan, billing_status FROM users WHERE billing_status = 'expired'")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn usage_totals(&self, user_id: Uuid) -> PlatformResult<UsageTotals> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS app_count, \
                    COALESCE(SUM(ram_mb), 0) AS ram_mb, \
                    COALESCE(SUM(disk_gb), 0) * 1024 AS disk_mb \
             FROM apps WHERE user_id = $1 AND status <> 'disabled'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(UsageTotals {
            app_count: row.try_get::<i64, _>("app_count").map_err(store_err)? as u32,
            ram_mb: row.try_get::<i64, _>("ram_mb").map_err(store_err)? as u32,
            disk_mb: row.try_get::<i64, _>("disk_mb").map_err(store_err)? as u32,
        })
    }

    async fn create_app(&self, app: App) -> PlatformResult<App> {
        sqlx::query(
            "INSERT INTO apps (id, user_id, name, slug, repo_url, branch, status, ram_mb, disk_gb, \
                                active_deployment_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(app.id)
        .bind(app.user_id)
        .bind(&app.name)
        .bind(&app.slug)
        .bind(&app.repo_url)
        .bind(&app.branch)
        .bind(app.status)
        .bind(app.ram_mb)
        .bind(app.disk_gb)
        .bind(app.active_deployment_id)
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                PlatformError::Store(format!("slug already taken: {}", app.slug))
            }
            other => store_err(other),
        })?;
        Ok(app)
    }

    async fn get_app(&self, app_id: Uuid) -> PlatformResult<Option<App>> {
        sqlx::query_as::<_, App>("SELECT * FROM apps WHERE id = $1")
            .bind(app_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn get_app_by_slug(&self, slug: &str) -> PlatformResult<Option<App>> {
        sqlx::query_as::<_, App>("SELECT * FROM apps WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn list_apps(&self, user_id: Uuid) -> PlatformResult<Vec<App>> {
        sqlx::query_as::<_, App>("SELECT * FROM apps WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn update_app(&self, app: App) -> PlatformResult<()> {
        sqlx::query(
            "UPDATE apps SET name = $2, repo_url = $3, branch = $4, status = $5, ram_mb = $6, \
                              disk_gb = $7, active_deployment_id = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(app.id)
        .bind(&app.name)
        .bind(&app.repo_url)
        .bind(&app.branch)
        .bind(app.status)
        .bind(app.ram_mb)
        .bind(app.disk_gb)
        .bind(app.active_deployment_id)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_app(&self, app_id: Uuid) -> PlatformResult<()> {
        // Foreign keys for deployments/runtime_instances/env_vars/log_chunks
        // are declared ON DELETE CASCADE in the migration; one statement
        // suffices.
        sqlx::query("DELETE FROM apps WHERE id = $1")
            .bind(app_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn create_deployment(&self, deployment: Deployment) -> PlatformResult<Deployment> {
        sqlx::query(
            "INSERT INTO deployments (id, app_id, status, image_tag, container_id, subdomain, \
                                       build_log_ref, runtime_log_ref, error_message, detected_port, \
                                       runtime_port, port_source, port_warning, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(deployment.id)
        .bind(deployment.app_id)
        .bind(deployment.status)
        .bind(&deployment.image_tag)
        .bind(&deployment.container_id)
        .bind(&deployment.subdomain)
        .bind(deployment.build_log_ref)
        .bind(deployment.runtime_log_ref)
        .bind(&deployment.error_message)
        .bind(deployment.detected_port)
        .bind(deployment.runtime_port)
        .bind(deployment.port_source)
        .bind(&deployment.port_warning)
        .bind(deployment.created_at)
        .bind(deployment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(deployment)
    }

    async fn get_deployment(&self, deployment_id: Uuid) -> PlatformResult<Option<Deployment>> {
        sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = $1")
            .bind(deployment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn list_deployments(&self, app_id: Uuid) -> PlatformResult<Vec<Deployment>> {
        sqlx::query_as::<_, Deployment>(
            "SELECT * FROM deployments WHERE app_id = $1 ORDER BY created_at DESC",
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn active_non_terminal_deployment(&self, app_id: Uuid) -> PlatformResult<Option<Deployment>> {
        sqlx::query_as::<_, Deployment>(
            "SELECT * FROM deployments \
             WHERE app_id = $1 AND status IN ('pending', 'building', 'deploying') \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn update_deployment(&self, deployment: Deployment) -> PlatformResult<()> {
        sqlx::query(
            "UPDATE deployments SET status = $2, image_tag = $3, container_id = $4, error_message = $5, \
                                     detected_port = $6, port_source = $7, port_warning = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(deployment.id)
        .bind(deployment.status)
        .bind(&deployment.image_tag)
        .bind(&deployment.container_id)
        .bind(&deployment.error_message)
        .bind(deployment.detected_port)
        .bind(deployment.port_source)
        .bind(&deployment.port_warning)
        .bind(deployment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn put_runtime_instance(&self, instance: RuntimeInstance) -> PlatformResult<()> {
        sqlx::query(
            "INSERT INTO runtime_instances (id, deployment_id, container_id, status, allocated_memory_mb, \
                                             allocated_cpu_shares, allocated_disk_gb, memory_usage_mb, \
                                             disk_usage_gb, restart_count, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) \
             ON CONFLICT (deployment_id) DO UPDATE SET \
                 container_id = EXCLUDED.container_id, status = EXCLUDED.status, \
                 memory_usage_mb = EXCLUDED.memory_usage_mb, disk_usage_gb = EXCLUDED.disk_usage_gb, \
                 restart_count = EXCLUDED.restart_count, updated_at = EXCLUDED.updated_at",
        )
        .bind(instance.id)
        .bind(instance.deployment_id)
        .bind(&instance.container_id)
        .bind(&instance.status)
        .bind(instance.allocated_memory_mb)
        .bind(instance.allocated_cpu_shares)
        .bind(instance.allocated_disk_gb)
        .bind(instance.memory_usage_mb)
        .bind(instance.disk_usage_gb)
        .bind(instance.restart_count)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_runtime_instance(&self, deployment_id: Uuid) -> PlatformResult<Option<RuntimeInstance>> {
        sqlx::query_as::<_, RuntimeInstance>("SELECT * FROM runtime_instances WHERE deployment_id = $1")
            .bind(deployment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn runtime_instances_to_supervise(&self) -> PlatformResult<Vec<RuntimeInstance>> {
        sqlx::query_as::<_, RuntimeInstance>(
            "SELECT ri.* FROM runtime_instances ri \
             JOIN deployments d ON d.id = ri.deployment_id \
             WHERE d.status = 'running'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn set_env_var(&self, env_var: EnvVar) -> PlatformResult<()> {
        sqlx::query(
            "INSERT INTO env_vars (app_id, key, value, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (app_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(env_var.app_id)
        .bind(&env_var.key)
        .bind(&env_var.value)
        .bind(env_var.created_at)
        .bind(env_var.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_env_var(&self, app_id: Uuid, key: &str) -> PlatformResult<()> {
        sqlx::query("DELETE FROM env_vars WHERE app_id = $1 AND key = $2")
            .bind(app_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_env_vars(&self, app_id: Uuid) -> PlatformResult<Vec<EnvVar>> {
        sqlx::query_as::<_, EnvVar>("SELECT * FROM env_vars WHERE app_id = $1 ORDER BY key")
            .bind(app_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn append_log_chunk(&self, chunk: LogChunk) -> PlatformResult<()> {
        sqlx::query(
            "INSERT INTO log_chunks (id, app_id, deployment_id, log_type, chunk_index, content, \
                                      size_bytes, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(chunk.id)
        .bind(chunk.app_id)
        .bind(chunk.deployment_id)
        .bind(chunk.log_type)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(chunk.size_bytes)
        .bind(chunk.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => PlatformError::Store(format!(
                "out-of-order or duplicate chunk_index {} for deployment {}",
                chunk.chunk_index, chunk.deployment_id
            )),
            other => store_err(other),
        })?;
        Ok(())
    }

    async fn get_log_chunks(
        &self,
        deployment_id: Uuid,
        log_type: LogType,
        offset: i64,
        limit: i64,
    ) -> PlatformResult<Vec<LogChunk>> {
        sqlx::query_as::<_, LogChunk>(
            "SELECT * FROM log_chunks WHERE deployment_id = $1 AND log_type = $2 \
             ORDER BY chunk_index, created_at OFFSET $3 LIMIT $4",
        )
        .bind(deployment_id)
        .bind(log_type)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn next_chunk_index(&self, deployment_id: Uuid, log_type: LogType) -> PlatformResult<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(chunk_index) + 1, 0) AS next_index FROM log_chunks \
             WHERE deployment_id = $1 AND log_type = $2",
        )
        .bind(deployment_id)
        .bind(log_type)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        row.try_get::<i64, _>("next_index").map_err(store_err)
    }

    async fn prune_log_chunks(&self, older_than: chrono::DateTime<chrono::Utc>) -> PlatformResult<u64> {
        let result = sqlx::query("DELETE FROM log_chunks WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn get_plan(&self, name: &str) -> PlatformResult<Option<Plan>> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn enqueue_job(&self, job: JobRecord) -> PlatformResult<()> {
        sqlx::query(
            "INSERT INTO job_records (job_id, job_type, payload, status, retry_count, max_retries, \
                                       error, claimed_by, claimed_at, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(job.job_id)
        .bind(job.job_type)
        .bind(&job.payload)
        .bind(job.status)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(&job.error)
        .bind(&job.claimed_by)
        .bind(job.claimed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn claim_job(&self, worker_id: &str, lease_seconds: u64) -> PlatformResult<Option<JobRecord>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let now = Utc::now();
        let lease_cutoff = now - chrono::Duration::seconds(lease_seconds as i64);

        let claimed = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM job_records \
             WHERE status = 'queued' \
                OR (status = 'running' AND claimed_at < $1) \
             ORDER BY created_at ASC \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1",
        )
        .bind(lease_cutoff)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let Some(mut job) = claimed else {
            tx.rollback().await.map_err(store_err)?;
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.updated_at = now;

        sqlx::query(
            "UPDATE job_records SET status = $2, claimed_by = $3, claimed_at = $4, updated_at = $5 \
             WHERE job_id = $1",
        )
        .bind(job.job_id)
        .bind(job.status)
        .bind(&job.claimed_by)
        .bind(job.claimed_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(Some(job))
    }

    async fn complete_job(&self, job_id: Uuid) -> PlatformResult<()> {
        sqlx::query("UPDATE job_records SET status = 'completed', updated_at = $2 WHERE job_id = $1")
            .bind(job_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> PlatformResult<JobStatus> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM job_records WHERE job_id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?
            .ok_or_else(|| PlatformError::Store(format!("no such job: {job_id}")))?;

        let now = Utc::now();
        let next_status = if job.retry_count < job.max_retries {
            JobStatus::Queued
        } else {
            JobStatus::Failed
        };

        sqlx::query(
            "UPDATE job_records SET status = $2, error = $3, retry_count = $4, claimed_by = NULL, \
                                     claimed_at = NULL, updated_at = $5 \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(next_status)
        .bind(error)
        .bind(if next_status == JobStatus::Queued { job.retry_count + 1 } else { job.retry_count })
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(next_status)
    }

    async fn fail_job_terminal(&self, job_id: Uuid, error: &str) -> PlatformResult<()> {
        sqlx::query(
            "UPDATE job_records SET status = 'failed', error = $2, updated_at = $3 WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn renew_lease(&self, job_id: Uuid, worker_id: &str, _lease_seconds: u64) -> PlatformResult<()> {
        let result = sqlx::query(
            "UPDATE job_records SET claimed_at = $3 WHERE job_id = $1 AND claimed_by = $2",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(PlatformError::Store("lease not held by this worker".to_string()));
        }
        Ok(())
    }
}
