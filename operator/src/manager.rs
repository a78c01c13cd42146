use crate::{
    App, Error, Metrics, Pool, Result, app,
    config::Settings,
    reconciler::AppReconciler,
    status::KubeStatusPublisher,
};
use chrono::{DateTime, Utc};
use common::{
    app::DEFAULT_TEMPLATES_KEY,
    context::get_client_async,
    helmhandler::HelmClient,
    pool::KubePoolRegistry,
    templates::{ConfigMapStorage, TemplateUpdater, Templates},
};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{self, Controller},
        watcher::Config,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Convergence logic for a single App
    pub reconciler: AppReconciler,
    pub settings: Settings,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub reporter: String,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: common::get_client_name(),
        }
    }
}

/// Data owned by the Manager
#[derive(Clone, Default)]
pub struct Manager {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Metrics,
}

/// Manager that owns a Controller for App
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` that drives a `Controller` + a future to be awaited
    /// It is up to `main` to wait for the controller stream.
    pub async fn new(settings: Settings) -> Result<(Self, BoxFuture<'static, ()>)> {
        let client = get_client_async().await?;
        let manager = Manager::default();

        let apps = Api::<App>::all(client.clone());
        let pools = Api::<Pool>::all(client.clone());
        // Ensure CRD is installed before loop-watching
        for check in [
            apps.list(&ListParams::default().limit(1)).await.map(|_| ()),
            pools.list(&ListParams::default().limit(1)).await.map(|_| ()),
        ] {
            check.map_err(|e| {
                tracing::error!("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");
                Error::KubeError(e)
            })?;
        }

        let storage = ConfigMapStorage::new(client.clone(), &settings.namespace);
        storage.update(DEFAULT_TEMPLATES_KEY, &Templates::builtin()).await?;

        let reconciler = AppReconciler::new(
            Arc::new(KubePoolRegistry::new(client.clone())),
            Arc::new(storage),
            Arc::new(HelmClient::new(&settings.helm_binary, &settings.namespace)),
            Arc::new(KubeStatusPublisher::new(client.clone())),
        );
        let concurrency = settings.concurrency;
        let context = Arc::new(Context {
            client,
            metrics: manager.metrics.clone(),
            diagnostics: manager.diagnostics.clone(),
            reconciler,
            settings,
        });

        let controller = Controller::new(apps, Config::default().any_semantic())
            .with_config(controller::Config::default().concurrency(concurrency));
        let store = controller.store();
        // A pool change may admit Apps that were refused before
        let controller = controller
            .watches(pools, Config::default(), move |pool: Pool| {
                app::apps_waiting_for_pool(&pool, store.state())
            })
            .shutdown_on_signal()
            .run(app::reconcile, app::error_policy, context)
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        Ok((manager, controller))
    }

    /// Metrics getter
    #[must_use]
    pub fn metrics(&self) -> String {
        self.metrics.encode()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
