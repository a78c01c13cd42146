use crate::{App, Result, status::StatusPublisher};
use common::{
    app::{AppPhase, AppStatus},
    chart::{ApplicationChart, ChartConfig},
    helmhandler::ChartEngine,
    pool::{PoolRegistry, Reservation},
    templates::TemplateReader,
};
use std::sync::Arc;

pub static QUOTA_EXCEEDED: &str = "you have reached the limit of apps";

/// Result of one reconciliation pass, replaces the whole App status
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub phase: AppPhase,
    pub message: String,
    /// Pool holding a slot for the App after this pass
    pub pool: Option<String>,
}

impl ReconcileOutcome {
    fn running(pool: &str) -> Self {
        Self {
            phase: AppPhase::Running,
            message: String::new(),
            pool: Some(pool.to_string()),
        }
    }

    fn failed(message: String, pool: Option<String>) -> Self {
        Self {
            phase: AppPhase::Failed,
            message,
            pool,
        }
    }

    fn pending(message: String, pool: Option<String>) -> Self {
        Self {
            phase: AppPhase::Pending,
            message,
            pool,
        }
    }

    pub fn status(&self) -> AppStatus {
        AppStatus {
            phase: self.phase,
            message: self.message.clone(),
            pool: self.pool.clone(),
        }
    }
}

/// Converges Apps: pool placement, templates lookup and chart update
#[derive(Clone)]
pub struct AppReconciler {
    pools: Arc<dyn PoolRegistry>,
    templates: Arc<dyn TemplateReader>,
    charts: Arc<dyn ChartEngine>,
    publisher: Arc<dyn StatusPublisher>,
}

impl AppReconciler {
    #[must_use]
    pub fn new(
        pools: Arc<dyn PoolRegistry>,
        templates: Arc<dyn TemplateReader>,
        charts: Arc<dyn ChartEngine>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            pools,
            templates,
            charts,
            publisher,
        }
    }

    /// Compute the next status of `app`, deploying it when possible.
    ///
    /// Never fails: every error becomes a Failed or Pending outcome. A failed
    /// pass never gives back the slot in `spec.pool`.
    pub async fn converge(&self, app: &App) -> ReconcileOutcome {
        let name = app.app_name();
        let previous = app.reserved_pool();
        let pool_name = app.spec.pool.as_str();

        let pool = match self.pools.resolve(pool_name).await {
            Ok(Some(pool)) => pool,
            Ok(None) => {
                return ReconcileOutcome::failed(format!("pool \"{pool_name}\" is not found"), previous);
            }
            Err(e) => {
                return ReconcileOutcome::pending(format!("failed to get pool \"{pool_name}\": {e}"), previous);
            }
        };

        match self.pools.try_reserve(pool_name, &name).await {
            Ok(Reservation::QuotaExceeded) => {
                tracing::info!("Pool {pool_name} is full, App {name} cannot be admitted");
                return ReconcileOutcome::failed(QUOTA_EXCEEDED.to_string(), previous);
            }
            Ok(reservation) => tracing::debug!("App {name} in pool {pool_name}: {reservation:?}"),
            Err(e) => {
                return ReconcileOutcome::pending(format!("failed to update pool status: {e}"), previous);
            }
        }

        // slots held elsewhere come from pool occupancy, not from the status
        let holders = match self.pools.holders(&name).await {
            Ok(holders) => holders,
            Err(e) => {
                return ReconcileOutcome::pending(format!("failed to list pools: {e}"), Some(pool_name.to_string()));
            }
        };
        for old in holders.iter().filter(|old| *old != pool_name) {
            if let Err(e) = self.pools.release(old, &name).await {
                return ReconcileOutcome::pending(
                    format!("failed to release slot in pool \"{old}\": {e}"),
                    Some(pool_name.to_string()),
                );
            }
            tracing::info!("App {name} moved from pool {old} to pool {pool_name}");
        }

        let templates = match self.templates.get(&app.templates_key()).await {
            Ok(templates) => templates,
            Err(e) => {
                return ReconcileOutcome::failed(
                    format!("failed to read configmap with the app's chart templates: {e}"),
                    Some(pool_name.to_string()),
                );
            }
        };

        let chart = ApplicationChart::new(app, &pool, templates);
        if let Err(e) = self.charts.update_chart(&chart, &ChartConfig::new(app)).await {
            return ReconcileOutcome::pending(
                format!("failed to update helm chart: {e}"),
                Some(pool_name.to_string()),
            );
        }
        ReconcileOutcome::running(pool_name)
    }

    /// Converge `app` and write the outcome to its status when it changed
    pub async fn run(&self, app: &App) -> Result<ReconcileOutcome> {
        let outcome = self.converge(app).await;
        let status = outcome.status();
        if app.status.as_ref() != Some(&status) {
            self.publisher.publish(app, &status).await?;
        }
        Ok(outcome)
    }

    /// Tear down a deleted App: remove its chart, then give back every slot it holds.
    ///
    /// A chart removal failure is only logged so the App can always go away.
    pub async fn cleanup(&self, app: &App) -> Result<()> {
        let name = app.app_name();
        if let Err(e) = self.charts.delete_chart(&name).await {
            tracing::warn!("Deleting the chart of App {name} failed with: {e}");
        }
        for pool in self.pools.holders(&name).await? {
            self.pools.release(&pool, &name).await?;
        }
        tracing::info!("App {name} cleaned up");
        Ok(())
    }
}
