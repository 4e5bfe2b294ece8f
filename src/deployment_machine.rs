//! Deployment State Machine: drives a single Deployment through
//! `pending → building → deploying → {running | failed}` under a per-app
//! advisory lock, orchestrating the Fetcher, Detector, Image Builder, and
//! Runtime Manager in sequence.

use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::DockerClient;
use crate::config::PlatformConfig;
use crate::detect::{classify, detect_port, detect_runtime, synthesize, RuntimeKind};
use crate::fetcher::RepositoryFetcher;
use crate::image_builder::ImageBuilder;
use crate::log_pipeline::LogPipeline;
use crate::models::{AppStatus, Deployment, DeploymentStatus};
use crate::platform_error::{PlatformError, PlatformResult};
use crate::quota::{QuotaEngine, ResourceRequest};
use crate::runtime_manager::RuntimeManager;
use crate::store::Store;

/// Registry of per-app advisory locks and cancellation tokens. A deployment
/// worker must hold the lock for `app_id` for the entire duration of a run;
/// a second worker attempting the same app fails fast with `DeployLocked`
/// rather than queueing behind the mutex, since the spec calls for the
/// later job to wait on the *queue*, not pile up inside this process
/// holding a lock. The companion `CancellationToken` lets `DeleteApp` signal
/// an in-flight pipeline to unwind at its next suspension point rather than
/// racing it to completion.
#[derive(Default)]
pub struct AppLocks {
    locks: Mutex<StdHashMap<Uuid, Arc<Mutex<()>>>>,
    tokens: Mutex<StdHashMap<Uuid, CancellationToken>>,
}

impl AppLocks {
    /// Builds an empty lock registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, app_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(app_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn token_for(&self, app_id: Uuid) -> CancellationToken {
        let mut tokens = self.tokens.lock().await;
        tokens.entry(app_id).or_insert_with(CancellationToken::new).clone()
    }

    /// Signals any deployment currently running for `app_id` to stop at its
    /// next suspension point. Called by `DeleteApp` before the App row is
    /// removed; a no-op if no deployment ever ran for this app.
    pub async fn cancel(&self, app_id: Uuid) {
        if let Some(token) = self.tokens.lock().await.get(&app_id) {
            token.cancel();
        }
    }
}

/// Orchestrates the deployment pipeline for a single App at a time, per the
/// per-app advisory lock.
pub struct DeploymentMachine {
    store: Arc<dyn Store>,
    client: Arc<DockerClient>,
    config: Arc<PlatformConfig>,
    locks: Arc<AppLocks>,
}

impl DeploymentMachine {
    /// Builds a `DeploymentMachine` against the platform's shared collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, client: Arc<DockerClient>, config: Arc<PlatformConfig>, locks: Arc<AppLocks>) -> Self {
        Self { store, client, config, locks }
    }

    /// The per-app lock and cancellation-token registry this machine drives
    /// deployments under. Exposed so `DeleteApp` can cancel an in-flight run.
    #[must_use]
    pub fn locks(&self) -> &Arc<AppLocks> {
        &self.locks
    }

    /// A fresh `QuotaEngine` against this machine's store and config. Cheap
    /// to construct (it holds only `Arc` clones), so `drive()` builds one on
    /// demand rather than threading a long-lived instance through every
    /// constructor call site.
    fn quota(&self) -> QuotaEngine {
        QuotaEngine::new(self.store.clone(), self.config.clone())
    }

    /// Drives `deployment_id` through the pipeline to a terminal state.
    /// Acquires the per-app lock up front; a stale job whose App has since
    /// been deleted is treated as a no-op rather than an error.
    #[instrument(skip(self), fields(%deployment_id))]
    pub async fn run(&self, deployment_id: Uuid) -> PlatformResult<()> {
        let Some(mut deployment) = self.store.get_deployment(deployment_id).await? else {
            return Ok(());
        };

        let app_lock = self.locks.lock_for(deployment.app_id).await;
        let _guard = match app_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Err(PlatformError::DeployLocked),
        };

        let Some(mut app) = self.store.get_app(deployment.app_id).await? else {
            info!(app_id = %deployment.app_id, "app deleted before deployment could run; treating as no-op");
            return Ok(());
        };

        let token = self.locks.token_for(deployment.app_id).await;

        match self.drive(&mut deployment, &app, &token).await {
            Ok(()) => Ok(()),
            Err(PlatformError::AppDeleted) => {
                info!(app_id = %app.id, "app deleted mid-deployment; abandoning without marking it failed");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "deployment failed");
                deployment.status = DeploymentStatus::Failed;
                deployment.error_message = Some(err.to_string());
                deployment.updated_at = Utc::now();
                self.store.update_deployment(deployment).await?;

                app.status = AppStatus::Failed;
                app.updated_at = Utc::now();
                self.store.update_app(app).await?;
                Err(err)
            }
        }
    }

    async fn drive(&self, deployment: &mut Deployment, app: &crate::models::App, token: &CancellationToken) -> PlatformResult<()> {
        let log_pipeline = Arc::new(LogPipeline::new(self.store.clone(), &self.config));

        // Re-check quota immediately before starting, per spec.md §4.H: the
        // plan may have changed (or billing lapsed) between enqueue and this
        // worker claiming the job, and a crash-recovery re-claim re-enters
        // here from `pending` without ever passing back through `CreateApp`
        // or `Redeploy`'s admission check.
        self.quota().admit(app.user_id, ResourceRequest::default()).await?;

        // pending -> building
        deployment.status = DeploymentStatus::Building;
        deployment.updated_at = Utc::now();
        self.store.update_deployment(deployment.clone()).await?;
        self.set_app_status(app.id, AppStatus::Building).await?;

        let fetcher = RepositoryFetcher::new(&self.config);
        let tree = fetcher.fetch(&app.repo_url, &app.branch, deployment.id).await?;

        if token.is_cancelled() {
            return Err(PlatformError::AppDeleted);
        }

        let runtime = detect_runtime(tree.path()).await?;
        let recipe = synthesize(tree.path(), runtime).await?;
        let port_detection = detect_port(tree.path(), &recipe).await?;
        let runtime_kind = classify(&recipe, &port_detection);

        if runtime_kind == RuntimeKind::Worker {
            // The worker-vs-web classification only exists once the recipe is
            // synthesized, so this is the earliest point the `workers` plan
            // flag (spec.md §4.H) can be enforced; reject before spending a
            // build on a deployment the plan forbids.
            self.quota()
                .admit(app.user_id, ResourceRequest { is_worker: true, ..Default::default() })
                .await?;
        }

        let builder = ImageBuilder::new(&self.client, log_pipeline.clone(), &self.config);
        let build_outcome = tokio::select! {
            result = builder.build(app.id, deployment.id, &app.slug, tree.path()) => Some(result),
            () = token.cancelled() => None,
        };
        tree.release().await?;
        let Some(build_outcome) = build_outcome else {
            return Err(PlatformError::AppDeleted);
        };
        let image_tag = build_outcome?;

        deployment.image_tag = Some(image_tag.clone());
        let mut runtime_kind = runtime_kind;
        if let RuntimeKind::Web(ref mut port_spec) = runtime_kind {
            if port_spec.source == crate::models::PortSource::None {
                if let Ok(inspected) = self.client.images().inspect(&crate::image::ImageRef::parse(&image_tag)?).await {
                    if let Some(port) = inspected
                        .config
                        .as_ref()
                        .and_then(|c| c.exposed_ports.as_ref())
                        .and_then(crate::detect::port_from_exposed_ports)
                    {
                        port_spec.port = port;
                        port_spec.source = crate::models::PortSource::Hardcoded;
                        port_spec.warning = Some(format!(
                            "port {port} discovered from the built image's EXPOSE; source could not read PORT statically"
                        ));
                    }
                }
            }
            deployment.detected_port = Some(i32::from(port_spec.port));
            deployment.port_source = port_spec.source;
            deployment.port_warning = port_spec.warning.clone();
        }

        if token.is_cancelled() {
            return Err(PlatformError::AppDeleted);
        }

        // building -> deploying
        deployment.status = DeploymentStatus::Deploying;
        deployment.updated_at = Utc::now();
        self.store.update_deployment(deployment.clone()).await?;
        self.set_app_status(app.id, AppStatus::Deploying).await?;

        let runtime_manager = RuntimeManager::new(&self.client, &self.config);

        if let Some(active_id) = app.active_deployment_id {
            if let Some(previous) = self.store.get_deployment(active_id).await? {
                if previous.id != deployment.id {
                    if let Some(container_id) = previous.container_id {
                        runtime_manager.stop(&container_id).await?;
                    }
                }
            }
        }

        let env_vars = self.store.list_env_vars(app.id).await?;
        let env_map: StdHashMap<String, String> = env_vars.into_iter().map(|v| (v.key, v.value)).collect();

        let plan_name = self.store.get_user(app.user_id).await?.map(|u| u.plan).unwrap_or_default();
        let cpu_shares = cpu_shares_for_plan(&self.config.plan(&plan_name));

        let outcome = runtime_manager
            .start(&app.slug, &image_tag, env_map, app.ram_mb, cpu_shares, app.disk_gb, &runtime_kind)
            .await?;

        deployment.container_id = Some(outcome.container_id.clone());

        if !outcome.healthy {
            return Err(PlatformError::HealthcheckFailed {
                detail: "container did not report healthy within the startup grace window".to_string(),
            });
        }

        // deploying -> running
        deployment.status = DeploymentStatus::Running;
        deployment.updated_at = Utc::now();
        self.store.update_deployment(deployment.clone()).await?;

        let mut app = app.clone();
        app.status = AppStatus::Running;
        app.active_deployment_id = Some(deployment.id);
        app.updated_at = Utc::now();
        self.store.update_app(app).await?;

        self.store
            .put_runtime_instance(crate::models::RuntimeInstance {
                id: Uuid::new_v4(),
                deployment_id: deployment.id,
                container_id: outcome.container_id,
                status: "running".to_string(),
                allocated_memory_mb: app.ram_mb,
                allocated_cpu_shares: cpu_shares,
                allocated_disk_gb: app.disk_gb,
                memory_usage_mb: 0.0,
                disk_usage_gb: 0.0,
                restart_count: 0,
                updated_at: Utc::now(),
            })
            .await?;

        Ok(())
    }

    async fn set_app_status(&self, app_id: Uuid, status: AppStatus) -> PlatformResult<()> {
        if let Some(mut app) = self.store.get_app(app_id).await? {
            app.status = status;
            app.updated_at = Utc::now();
            self.store.update_app(app).await?;
        }
        Ok(())
    }
}

/// Docker CPU-shares proportional to a plan's RAM allocation: 1024 shares
/// (one full core's relative weight) per 512 MB of plan RAM.
fn cpu_shares_for_plan(plan: &crate::config::PlanDefaults) -> i32 {
    let units = plan.max_ram_mb / 512;
    (units.max(1) * 1024) as i32
}
