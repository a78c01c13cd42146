use crate::{
    Error, Result,
    chart::{ApplicationChart, ChartConfig},
};
use async_trait::async_trait;
use std::process::Output;
use tokio::process::Command;

/// Installs, upgrades and removes the chart of an application
#[async_trait]
pub trait ChartEngine: Send + Sync {
    async fn update_chart(&self, chart: &ApplicationChart, config: &ChartConfig) -> Result<()>;
    /// Deleting the chart of an application that has none is not an error
    async fn delete_chart(&self, app: &str) -> Result<()>;
}

/// ChartEngine driving the helm binary.
///
/// Releases are stored in `namespace`, the workloads land in the pool
/// namespace given to the templates through the values.
#[derive(Clone, Debug)]
pub struct HelmClient {
    binary: String,
    namespace: String,
}

impl HelmClient {
    #[must_use]
    pub fn new(binary: &str, namespace: &str) -> Self {
        Self {
            binary: binary.to_string(),
            namespace: namespace.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        tracing::debug!("Running {} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(Error::Stdio)
    }
}

fn failure(action: &str, out: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    if stderr.is_empty() {
        Error::HelmError(format!("helm {action} exited with {}", out.status))
    } else {
        Error::HelmError(stderr)
    }
}

#[async_trait]
impl ChartEngine for HelmClient {
    async fn update_chart(&self, chart: &ApplicationChart, config: &ChartConfig) -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Stdio)?;
        let chart_dir = dir.path().join(chart.app_name());
        chart.write_to(&chart_dir, config)?;
        let chart_path = chart_dir.to_string_lossy().to_string();
        let out = self
            .run(&[
                "upgrade",
                "--install",
                chart.app_name(),
                chart_path.as_str(),
                "--namespace",
                self.namespace.as_str(),
            ])
            .await?;
        if !out.status.success() {
            return Err(failure("upgrade", &out));
        }
        tracing::info!("Chart of {} is up to date (version {})", chart.app_name(), config.version);
        Ok(())
    }

    async fn delete_chart(&self, app: &str) -> Result<()> {
        let out = self.run(&["uninstall", app, "--namespace", self.namespace.as_str()]).await?;
        if out.status.success() {
            tracing::info!("Chart of {app} removed");
            return Ok(());
        }
        let err = failure("uninstall", &out);
        if err.to_string().contains("not found") {
            tracing::debug!("Chart of {app} was already removed");
            return Ok(());
        }
        Err(err)
    }
}
