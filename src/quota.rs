//! Quota & Plan Engine: a pure function of (User, requested delta) against
//! plan limits, consulted at admission time and again immediately before a
//! deployment starts (in case the plan changed between enqueue and claim).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{PlanDefaults, PlatformConfig};
use crate::models::{AppStatus, BillingStatus};
use crate::platform_error::{PlatformError, PlatformResult};
use crate::store::{Store, UsageTotals};

/// Resource delta an operation would add, checked against a plan's remaining
/// headroom. `app_delta` is typically 1 for `CreateApp` and 0 for a redeploy
/// that doesn't change allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceRequest {
    /// Additional Apps this operation would create.
    pub app_delta: u32,
    /// Additional RAM, in megabytes, this operation would allocate.
    pub ram_mb: u32,
    /// Additional disk, in megabytes, this operation would allocate.
    pub disk_mb: u32,
    /// Whether the operation is a worker-tagged (non-web) deployment.
    pub is_worker: bool,
}

/// Consults plan limits against current usage before admitting work.
pub struct QuotaEngine {
    store: Arc<dyn Store>,
    config: Arc<PlatformConfig>,
}

impl QuotaEngine {
    /// Builds a `QuotaEngine` against the platform's store and configuration.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: Arc<PlatformConfig>) -> Self {
        Self { store, config }
    }

    /// Checks `request` against `user_id`'s plan and current usage. Returns
    /// `Ok(())` if the operation may proceed, or a typed `PlanLimitExceeded`
    /// / `ZeroDowntimeNotSupported` error otherwise.
    pub async fn admit(&self, user_id: Uuid, request: ResourceRequest) -> PlatformResult<()> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| PlatformError::internal("quota check against unknown user"))?;

        if user.billing_status == BillingStatus::Expired {
            return Err(PlatformError::PlanLimitExceeded {
                detail: "billing is expired; this account's apps are disabled".to_string(),
            });
        }

        let plan = self.config.plan(&user.plan);
        let usage = self.store.usage_totals(user_id).await?;

        self.check_limits(&plan, &usage, &request)
    }

    fn check_limits(&self, plan: &PlanDefaults, usage: &UsageTotals, request: &ResourceRequest) -> PlatformResult<()> {
        if usage.app_count + request.app_delta > plan.max_apps {
            return Err(PlatformError::PlanLimitExceeded {
                detail: format!("app count {} would exceed plan limit {}", usage.app_count + request.app_delta, plan.max_apps),
            });
        }
        if usage.ram_mb + request.ram_mb > plan.max_ram_mb {
            return Err(PlatformError::PlanLimitExceeded {
                detail: format!("ram {}mb would exceed plan limit {}mb", usage.ram_mb + request.ram_mb, plan.max_ram_mb),
            });
        }
        if usage.disk_mb + request.disk_mb > plan.max_disk_mb {
            return Err(PlatformError::PlanLimitExceeded {
                detail: format!("disk {}mb would exceed plan limit {}mb", usage.disk_mb + request.disk_mb, plan.max_disk_mb),
            });
        }
        if request.is_worker && !plan.workers {
            return Err(PlatformError::PlanLimitExceeded {
                detail: "plan does not permit worker-tagged deployments".to_string(),
            });
        }
        Ok(())
    }

    /// Background loop: transitions every App owned by a user whose billing
    /// has expired to `disabled`. Disabled apps are excluded from
    /// `usage_totals`'s `app_count`, so restoring billing and deleting the
    /// excess does not require manual re-enablement bookkeeping.
    pub async fn run_disable_loop(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.disable_expired_tick().await {
                        warn!(error = %err, "billing-expiry disable loop tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn disable_expired_tick(&self) -> PlatformResult<()> {
        for user in self.store.users_with_expired_billing().await? {
            self.disable_apps_for_user(user.id).await?;
        }
        Ok(())
    }

    /// Disables every App owned by `user_id`, called once billing is known
    /// to have expired (e.g. by a billing webhook handler upstream of this core).
    pub async fn disable_apps_for_user(&self, user_id: Uuid) -> PlatformResult<()> {
        for mut app in self.store.list_apps(user_id).await? {
            if app.status == AppStatus::Disabled {
                continue;
            }
            app.status = AppStatus::Disabled;
            app.updated_at = Utc::now();
            self.store.update_app(app).await?;
        }
        info!(%user_id, "apps disabled for expired billing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(max_apps: u32, max_ram_mb: u32, max_disk_mb: u32) -> PlanDefaults {
        PlanDefaults { max_apps, max_ram_mb, max_disk_mb, workers: false, zero_downtime: false }
    }

    #[test]
    fn app_count_at_the_limit_is_rejected() {
        let config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        let store: Arc<dyn Store> = Arc::new(crate::store::MemoryStore::new());
        let engine = QuotaEngine::new(store, Arc::new(config));
        let usage = UsageTotals { app_count: 1, ram_mb: 0, disk_mb: 0 };
        let request = ResourceRequest { app_delta: 1, ..Default::default() };
        let err = engine.check_limits(&plan(1, 512, 1024), &usage, &request).unwrap_err();
        assert_eq!(err.code(), "PLAN_LIMIT_EXCEEDED");
    }

    #[test]
    fn ram_within_headroom_is_admitted() {
        let config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        let store: Arc<dyn Store> = Arc::new(crate::store::MemoryStore::new());
        let engine = QuotaEngine::new(store, Arc::new(config));
        let usage = UsageTotals { app_count: 0, ram_mb: 0, disk_mb: 0 };
        let request = ResourceRequest { app_delta: 1, ram_mb: 512, disk_mb: 1024, is_worker: false };
        assert!(engine.check_limits(&plan(1, 512, 1024), &usage, &request).is_ok());
    }

    #[test]
    fn worker_tagged_request_rejected_on_plan_without_workers() {
        let config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        let store: Arc<dyn Store> = Arc::new(crate::store::MemoryStore::new());
        let engine = QuotaEngine::new(store, Arc::new(config));
        let usage = UsageTotals::default();
        let request = ResourceRequest { is_worker: true, ..Default::default() };
        let err = engine.check_limits(&plan(1, 512, 1024), &usage, &request).unwrap_err();
        assert_eq!(err.code(), "PLAN_LIMIT_EXCEEDED");
    }
}
