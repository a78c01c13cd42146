use async_trait::async_trait;
use kube::runtime::controller::Action;
use manager::Context;
use std::sync::Arc;

pub use common::{Error, Result, app::App, pool::Pool};

#[async_trait]
pub trait Reconciler {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action>;
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action>;
}

pub static APP_FINALIZER: &str = "apps.skipper.io";

/// Kube controller glue for App
pub mod app;
/// Operator settings
pub mod config;
/// Convergence of a single App
pub mod reconciler;
/// Status write-back
pub mod status;

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Metrics
mod metrics;
pub use metrics::Metrics;
