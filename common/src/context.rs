use crate::{Error, Result};
use kube::client::Client;

pub static GROUP: &str = "skipper.io";

fn get_prog_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()?
        .to_str()?
        .to_owned()
        .into()
}

/// Field manager name used for server-side patches
pub fn get_client_name() -> String {
    match get_prog_name() {
        Some(p) if p == "operator" => format!("controller.{GROUP}"),
        _ => GROUP.to_string(),
    }
}

pub async fn get_client_async() -> Result<Client> {
    Client::try_default().await.map_err(Error::KubeError)
}
