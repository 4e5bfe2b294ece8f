//! `PlatformApi`: the operations the external HTTP layer is built against,
//! plus (behind the `http` feature) an illustrative `axum` router proving
//! the wire contract described in the external interfaces design. The core
//! pipeline works without this feature; the dashboard's actual front door
//! is out of scope for this crate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::models::{App, Deployment, EnvVar};
use crate::platform_error::{PlatformError, PlatformResult};
use crate::queue::WorkerPool;
use crate::quota::{QuotaEngine, ResourceRequest};
use crate::store::Store;

/// Default RAM allocation for a newly created App, in megabytes. The plan
/// table caps the *sum* across a user's Apps but names no per-app default,
/// so this core picks a conservative starting point; a future `CreateApp`
/// could take it as a caller-supplied field instead.
const DEFAULT_APP_RAM_MB: u32 = 256;
/// Default disk allocation for a newly created App, in gigabytes.
const DEFAULT_APP_DISK_GB: u32 = 1;

/// Everything `GetLogs` returns: the build and runtime log text concatenated
/// from their chunks, plus the Deployment's recorded error message, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogs {
    /// Concatenated `build` log chunks, in `chunk_index` order.
    pub build_log: String,
    /// Concatenated `runtime` log chunks, in `chunk_index` order.
    pub runtime_log: String,
    /// The Deployment's recorded error message, if it failed.
    pub error_message: Option<String>,
}

/// Request body for `CreateApp`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppRequest {
    /// Owning user.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Globally unique slug; generated from `name` when omitted.
    pub slug: Option<String>,
    /// Git remote URL to clone.
    pub repo_url: String,
    /// Branch to check out.
    pub branch: String,
    /// Initial environment variables, applied before the first deployment starts.
    pub env_vars: Option<Vec<(String, String)>>,
}

/// The operations the external HTTP layer is built against. Implemented
/// against the shared [`Store`], [`QuotaEngine`], and [`WorkerPool`], so
/// every operation here is provable without a running HTTP server.
pub struct PlatformApi {
    store: Arc<dyn Store>,
    quota: QuotaEngine,
    queue: Arc<WorkerPool>,
    config: Arc<PlatformConfig>,
}

impl PlatformApi {
    /// Builds a `PlatformApi` against the platform's shared collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, quota: QuotaEngine, queue: Arc<WorkerPool>, config: Arc<PlatformConfig>) -> Self {
        Self { store, quota, queue, config }
    }

    /// Creates an App row and enqueues its first Deployment. Runs the quota
    /// check before any row is written, so a rejected request leaves no
    /// partial App, Deployment, or working directory behind.
    pub async fn create_app(&self, request: CreateAppRequest) -> PlatformResult<(App, Deployment)> {
        self.quota
            .admit(
                request.user_id,
                ResourceRequest {
                    app_delta: 1,
                    ram_mb: DEFAULT_APP_RAM_MB,
                    disk_mb: DEFAULT_APP_DISK_GB * 1024,
                    is_worker: false,
                },
            )
            .await?;

        let slug = request.slug.unwrap_or_else(|| slugify(&request.name));
        let now = chrono::Utc::now();
        let app = App {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            name: request.name,
            slug,
            repo_url: request.repo_url,
            branch: request.branch,
            status: crate::models::AppStatus::Pending,
            ram_mb: DEFAULT_APP_RAM_MB as i32,
            disk_gb: DEFAULT_APP_DISK_GB as i32,
            active_deployment_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_app(app.clone()).await?;

        for (key, value) in request.env_vars.into_iter().flatten() {
            self.store
                .set_env_var(EnvVar {
                    app_id: app.id,
                    key,
                    value,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
        }

        let deployment = self.enqueue_deployment(&app).await?;
        Ok((app, deployment))
    }

    /// Deletes an App: stops its running container, removes its image, and
    /// deletes its row. Idempotent against an App that no longer exists.
    /// Cancels any deployment currently in flight for this App first, so the
    /// worker driving it unwinds at its next suspension point instead of
    /// racing this call to completion.
    pub async fn delete_app(&self, app_id: Uuid) -> PlatformResult<()> {
        let Some(app) = self.store.get_app(app_id).await? else {
            return Ok(());
        };

        self.queue.machine().locks().cancel(app_id).await;

        if let Some(active_id) = app.active_deployment_id {
            if let Some(deployment) = self.store.get_deployment(active_id).await? {
                if let (Some(container_id), Some(image_tag)) = (deployment.container_id, deployment.image_tag) {
                    let client = crate::client::DockerClient::new().await.map_err(PlatformError::from)?;
                    let runtime_manager = crate::runtime_manager::RuntimeManager::new(&client, &self.config);
                    runtime_manager.remove(&container_id, &image_tag).await?;
                }
            }
        }

        self.store.delete_app(app_id).await
    }

    /// Enqueues a new Deployment for an existing App's current `repo_url`/`branch`.
    pub async fn redeploy(&self, app_id: Uuid) -> PlatformResult<Deployment> {
        let Some(app) = self.store.get_app(app_id).await? else {
            return Err(PlatformError::internal("redeploy against unknown app"));
        };
        self.quota.admit(app.user_id, ResourceRequest::default()).await?;
        self.enqueue_deployment(&app).await
    }

    /// Looks up a single App.
    pub async fn get_app(&self, app_id: Uuid) -> PlatformResult<Option<App>> {
        self.store.get_app(app_id).await
    }

    /// Lists a user's Apps.
    pub async fn list_apps(&self, user_id: Uuid) -> PlatformResult<Vec<App>> {
        self.store.list_apps(user_id).await
    }

    /// Lists an App's Deployments, newest first.
    pub async fn list_deployments(&self, app_id: Uuid) -> PlatformResult<Vec<Deployment>> {
        self.store.list_deployments(app_id).await
    }

    /// Looks up a single Deployment.
    pub async fn get_deployment(&self, deployment_id: Uuid) -> PlatformResult<Option<Deployment>> {
        self.store.get_deployment(deployment_id).await
    }

    /// Fetches a Deployment's concatenated build/runtime logs and error message.
    pub async fn get_logs(&self, deployment_id: Uuid) -> PlatformResult<DeploymentLogs> {
        let deployment = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PlatformError::internal("logs requested for unknown deployment"))?;

        let build_log = self.concat_log(deployment_id, crate::models::LogType::Build).await?;
        let runtime_log = self.concat_log(deployment_id, crate::models::LogType::Runtime).await?;

        Ok(DeploymentLogs { build_log, runtime_log, error_message: deployment.error_message })
    }

    async fn concat_log(&self, deployment_id: Uuid, log_type: crate::models::LogType) -> PlatformResult<String> {
        let mut out = String::new();
        let mut offset = 0i64;
        const PAGE: i64 = 256;
        loop {
            let chunks = self.store.get_log_chunks(deployment_id, log_type, offset, PAGE).await?;
            if chunks.is_empty() {
                break;
            }
            let fetched = chunks.len() as i64;
            for chunk in chunks {
                out.push_str(&chunk.content);
            }
            offset += fetched;
            if fetched < PAGE {
                break;
            }
        }
        Ok(out)
    }

    /// Sets (creating or overwriting) an App's environment variable.
    pub async fn set_env_var(&self, app_id: Uuid, key: String, value: String) -> PlatformResult<()> {
        self.store
            .set_env_var(EnvVar { app_id, key, value, created_at: chrono::Utc::now(), updated_at: chrono::Utc::now() })
            .await
    }

    /// Deletes an App's environment variable. Idempotent against a key that
    /// was never set.
    pub async fn delete_env_var(&self, app_id: Uuid, key: &str) -> PlatformResult<()> {
        self.store.delete_env_var(app_id, key).await
    }

    /// Lists an App's environment variables.
    pub async fn list_env_vars(&self, app_id: Uuid) -> PlatformResult<Vec<EnvVar>> {
        self.store.list_env_vars(app_id).await
    }

    async fn enqueue_deployment(&self, app: &App) -> PlatformResult<Deployment> {
        let now = chrono::Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4(),
            app_id: app.id,
            status: crate::models::DeploymentStatus::Pending,
            image_tag: None,
            container_id: None,
            subdomain: self.config.subdomain_for(&app.slug),
            build_log_ref: Uuid::new_v4(),
            runtime_log_ref: Uuid::new_v4(),
            error_message: None,
            detected_port: None,
            runtime_port: i32::from(self.config.internal_port),
            port_source: crate::models::PortSource::None,
            port_warning: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_deployment(deployment.clone()).await?;
        self.queue.enqueue_deploy(deployment.id, self.config.max_retries).await?;
        Ok(deployment)
    }
}

/// Lowercases, replaces non-alphanumeric runs with a single hyphen, and
/// trims leading/trailing hyphens, producing the default slug from an App name.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_hyphen = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(feature = "http")]
pub mod http {
    //! Illustrative `axum` router binding [`PlatformApi`] to JSON HTTP
    //! endpoints. Proves the wire contract; not the platform's production
    //! front door.

    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use serde::Deserialize;
    use tower_http::trace::TraceLayer;
    use uuid::Uuid;

    use super::{CreateAppRequest, PlatformApi};
    use crate::platform_error::PlatformError;

    impl IntoResponse for PlatformError {
        fn into_response(self) -> Response {
            let status = match self.category() {
                "policy" if self.code() == "PLAN_LIMIT_EXCEEDED" => StatusCode::PAYMENT_REQUIRED,
                "policy" => StatusCode::CONFLICT,
                "fetch" | "detect" | "config" => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = serde_json::json!({ "code": self.code(), "message": self.to_string() });
            (status, Json(body)).into_response()
        }
    }

    /// Builds the illustrative router. Every handler only enqueues jobs or
    /// reads state; none drive state machines directly, per the design's
    /// HTTP-layer boundary.
    #[must_use]
    pub fn router(api: Arc<PlatformApi>) -> Router {
        Router::new()
            .route("/apps", post(create_app).get(list_apps))
            .route("/apps/{app_id}", get(get_app).delete(delete_app))
            .route("/apps/{app_id}/redeploy", post(redeploy))
            .route("/apps/{app_id}/deployments", get(list_deployments))
            .route("/deployments/{deployment_id}", get(get_deployment))
            .route("/deployments/{deployment_id}/logs", get(get_logs))
            .route("/apps/{app_id}/env", get(list_env_vars).put(set_env_var))
            .route("/apps/{app_id}/env/{key}", delete(delete_env_var))
            .layer(TraceLayer::new_for_http())
            .with_state(api)
    }

    async fn create_app(State(api): State<Arc<PlatformApi>>, Json(body): Json<CreateAppRequest>) -> Result<impl IntoResponse, PlatformError> {
        let (app, deployment) = api.create_app(body).await?;
        Ok((StatusCode::CREATED, Json(serde_json::json!({ "app": app, "deployment": deployment }))))
    }

    async fn delete_app(State(api): State<Arc<PlatformApi>>, Path(app_id): Path<Uuid>) -> Result<impl IntoResponse, PlatformError> {
        api.delete_app(app_id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    async fn redeploy(State(api): State<Arc<PlatformApi>>, Path(app_id): Path<Uuid>) -> Result<impl IntoResponse, PlatformError> {
        let deployment = api.redeploy(app_id).await?;
        Ok(Json(deployment))
    }

    async fn get_app(State(api): State<Arc<PlatformApi>>, Path(app_id): Path<Uuid>) -> Result<impl IntoResponse, PlatformError> {
        match api.get_app(app_id).await? {
            Some(app) => Ok(Json(app).into_response()),
            None => Ok(StatusCode::NOT_FOUND.into_response()),
        }
    }

    #[derive(Debug, Deserialize)]
    struct ListAppsQuery {
        user_id: Uuid,
    }

    async fn list_apps(State(api): State<Arc<PlatformApi>>, Query(query): Query<ListAppsQuery>) -> Result<impl IntoResponse, PlatformError> {
        Ok(Json(api.list_apps(query.user_id).await?))
    }

    async fn list_deployments(State(api): State<Arc<PlatformApi>>, Path(app_id): Path<Uuid>) -> Result<impl IntoResponse, PlatformError> {
        Ok(Json(api.list_deployments(app_id).await?))
    }

    async fn get_deployment(State(api): State<Arc<PlatformApi>>, Path(deployment_id): Path<Uuid>) -> Result<impl IntoResponse, PlatformError> {
        match api.get_deployment(deployment_id).await? {
            Some(deployment) => Ok(Json(deployment).into_response()),
            None => Ok(StatusCode::NOT_FOUND.into_response()),
        }
    }

    async fn get_logs(State(api): State<Arc<PlatformApi>>, Path(deployment_id): Path<Uuid>) -> Result<impl IntoResponse, PlatformError> {
        Ok(Json(api.get_logs(deployment_id).await?))
    }

    async fn list_env_vars(State(api): State<Arc<PlatformApi>>, Path(app_id): Path<Uuid>) -> Result<impl IntoResponse, PlatformError> {
        Ok(Json(api.list_env_vars(app_id).await?))
    }

    #[derive(Debug, Deserialize)]
    struct SetEnvVarBody {
        key: String,
        value: String,
    }

    async fn set_env_var(State(api): State<Arc<PlatformApi>>, Path(app_id): Path<Uuid>, Json(body): Json<SetEnvVarBody>) -> Result<impl IntoResponse, PlatformError> {
        api.set_env_var(app_id, body.key, body.value).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    async fn delete_env_var(State(api): State<Arc<PlatformApi>>, Path((app_id, key)): Path<(Uuid, String)>) -> Result<impl IntoResponse, PlatformError> {
        api.delete_env_var(app_id, &key).await?;
        Ok(StatusCode::NO_CONTENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment_machine::{AppLocks, DeploymentMachine};
    use crate::store::MemoryStore;

    #[test]
    fn slugify_collapses_punctuation_and_case() {
        assert_eq!(slugify("My Cool App!!"), "my-cool-app");
        assert_eq!(slugify("  leading and trailing  "), "leading-and-trailing");
    }

    async fn api_without_an_active_deployment() -> Option<(PlatformApi, App)> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = Arc::new(PlatformConfig::with_defaults("postgres://x", "/tmp"));
        let client = Arc::new(crate::client::DockerClient::new().await.ok()?);
        let locks = Arc::new(AppLocks::new());
        let machine = Arc::new(DeploymentMachine::new(store.clone(), client, config.clone(), locks));
        let queue = Arc::new(WorkerPool::new(store.clone(), machine, &config));
        let quota = QuotaEngine::new(store.clone(), config.clone());
        let api = PlatformApi::new(store.clone(), quota, queue, config);

        let now = chrono::Utc::now();
        let app = App {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "demo".to_string(),
            slug: "demo".to_string(),
            repo_url: "https://example.invalid/repo.git".to_string(),
            branch: "main".to_string(),
            status: crate::models::AppStatus::Running,
            ram_mb: 512,
            disk_gb: 1,
            active_deployment_id: None,
            created_at: now,
            updated_at: now,
        };
        store.create_app(app.clone()).await.ok()?;
        Some((api, app))
    }

    #[tokio::test]
    async fn delete_app_cancels_the_apps_token_before_removing_its_row() {
        let Some((api, app)) = api_without_an_active_deployment().await else {
            println!("Docker not available, skipping test");
            return;
        };

        let token = api.queue.machine().locks().token_for(app.id).await;
        assert!(!token.is_cancelled());

        api.delete_app(app.id).await.unwrap();

        assert!(token.is_cancelled());
        assert!(api.store.get_app(app.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_app_against_an_unknown_app_is_a_no_op() {
        let Some((api, _app)) = api_without_an_active_deployment().await else {
            println!("Docker not available, skipping test");
            return;
        };
        api.delete_app(Uuid::new_v4()).await.unwrap();
    }
}
