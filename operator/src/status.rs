use crate::{App, Error, Result};
use async_trait::async_trait;
use common::{app::AppStatus, get_client_name};
use kube::{
    Client, ResourceExt,
    api::{Api, Patch, PatchParams},
};
use serde_json::json;

/// Writes the outcome of a reconciliation back to the App
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, app: &App, status: &AppStatus) -> Result<()>;
}

pub struct KubeStatusPublisher {
    api: Api<App>,
}

impl KubeStatusPublisher {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl StatusPublisher for KubeStatusPublisher {
    async fn publish(&self, app: &App, status: &AppStatus) -> Result<()> {
        let name = app.name_any();
        let new_status: Patch<serde_json::Value> = Patch::Merge(json!({
            "apiVersion": "skipper.io/v1",
            "kind": "App",
            "status": status,
        }));
        let ps = PatchParams::apply(&get_client_name());
        self.api
            .patch_status(&name, &ps, &new_status)
            .await
            .map_err(Error::KubeError)?;
        tracing::debug!("Status of App {name} is now {} {:?}", status.phase, status.message);
        Ok(())
    }
}
