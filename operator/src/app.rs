use crate::{APP_FINALIZER, App, Error, Pool, Reconciler, Result, manager::Context, reconciler::ReconcileOutcome};
use async_trait::async_trait;
use chrono::Utc;
use common::app::AppPhase;
use kube::{
    ResourceExt,
    api::Api,
    runtime::{
        controller::Action,
        finalizer::{Event as Finalizer, finalizer},
        reflector::ObjectRef,
    },
};
use std::{sync::Arc, time::Duration};
use tracing::instrument;

/// Delay before the next pass: settled Apps wait for the resync period,
/// Pending ones are retried sooner
pub fn requeue_after(outcome: &ReconcileOutcome, resync: Duration, retry: Duration) -> Duration {
    match outcome.phase {
        AppPhase::Pending => retry,
        AppPhase::Running | AppPhase::Failed => resync,
    }
}

/// Apps to revisit after `pool` changed.
///
/// Every reservation rewrites the pool status, so Running Apps are left to
/// their resync: only refused or pending ones may benefit from the change.
pub fn apps_waiting_for_pool(pool: &Pool, apps: impl IntoIterator<Item = Arc<App>>) -> Vec<ObjectRef<App>> {
    let name = pool.name_any();
    apps.into_iter()
        .filter(|app| app.spec.pool == name)
        .filter(|app| app.status.as_ref().is_none_or(|s| s.phase != AppPhase::Running))
        .map(|app| ObjectRef::from_obj(&*app))
        .collect()
}

#[async_trait]
impl Reconciler for App {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        tracing::debug!("Reconcilling App {}", self.name_any());
        let outcome = ctx.reconciler.run(self).await?;
        ctx.metrics.reconcile_outcome(outcome.phase);
        if !outcome.message.is_empty() {
            tracing::info!("App {} is {}: {}", self.name_any(), outcome.phase, outcome.message);
        }
        Ok(Action::requeue(requeue_after(
            &outcome,
            ctx.settings.resync(),
            ctx.settings.retry(),
        )))
    }

    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        tracing::debug!("Cleaning App {}", self.name_any());
        ctx.reconciler.cleanup(self).await?;
        Ok(Action::await_change())
    }
}

#[instrument(skip(ctx, app), fields(app = %app.name_any()))]
pub async fn reconcile(app: Arc<App>, ctx: Arc<Context>) -> Result<Action> {
    let _mes = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();
    let apps: Api<App> = Api::all(ctx.client.clone());

    finalizer(&apps, APP_FINALIZER, app, |event| async {
        match event {
            Finalizer::Apply(app) => app.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(app) => app.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

#[must_use]
pub fn error_policy(app: Arc<App>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::warn!("reconcile failed for App '{}': {:?}", app.name_any(), error);
    ctx.metrics.reconcile_failure(&app, error);
    Action::requeue(ctx.settings.retry())
}
