use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the templates bundle used when an App does not override it
pub static DEFAULT_TEMPLATES_KEY: &str = "templates-default";

/// ProcessSpec describe a process of a deployment
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Name of the process (web, worker...)
    pub name: String,
    /// Number of replicas
    pub units: Option<i32>,
    /// Command line of the process
    #[serde(default)]
    pub cmd: Vec<String>,
}

/// RoutingSettings contains the traffic share of a deployment
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSettings {
    /// Weight of the deployment, between 0 and 100
    pub weight: u8,
}

/// AppDeploymentSpec describe one deployed version of an application
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppDeploymentSpec {
    /// Container image
    pub image: String,
    /// Deployment version, incremented on every deploy
    pub version: u32,
    /// Processes to run from the image
    #[serde(default)]
    pub processes: Vec<ProcessSpec>,
    /// Traffic settings
    pub routing_settings: Option<RoutingSettings>,
}

/// ChartSpec allows to customize the helm chart of an application
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Name of the configmap holding the templates of the chart. Default to "templates-default"
    pub templates_config_map_name: Option<String>,
}

/// Describe an application deployed in a pool
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "App",
    status = "AppStatus",
    shortname = "app",
    group = "skipper.io",
    version = "v1"
)]
#[kube(
    doc = "Custom resource representing an application deployed by skipper",
    printcolumn = r#"
    {"name":"pool",    "type":"string", "description":"Pool", "jsonPath":".spec.pool"},
    {"name":"phase",   "type":"string", "description":"Phase", "jsonPath":".status.phase"},
    {"name":"message", "type":"string", "description":"Message", "jsonPath":".status.message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Name of the pool the application runs in
    pub pool: String,
    /// Deployments of the application, oldest first
    #[serde(default)]
    pub deployments: Vec<AppDeploymentSpec>,
    /// Chart customization
    #[serde(default)]
    pub chart: ChartSpec,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum AppPhase {
    #[default]
    Pending,
    Running,
    Failed,
}

impl std::fmt::Display for AppPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppPhase::Pending => write!(f, "Pending"),
            AppPhase::Running => write!(f, "Running"),
            AppPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// The status object of `App`
#[derive(Deserialize, Serialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
pub struct AppStatus {
    /// Phase of the application
    #[serde(default)]
    pub phase: AppPhase,
    /// Human readable reason of the phase, empty when everything is fine
    #[serde(default)]
    pub message: String,
    /// Pool currently holding a slot for this application
    pub pool: Option<String>,
}

impl App {
    /// Key of the templates bundle to render this application with
    pub fn templates_key(&self) -> String {
        self.spec
            .chart
            .templates_config_map_name
            .clone()
            .unwrap_or_else(|| DEFAULT_TEMPLATES_KEY.to_string())
    }

    /// Pool recorded as holding a slot by a previous reconciliation
    pub fn reserved_pool(&self) -> Option<String> {
        self.status.as_ref().and_then(|s| s.pool.clone())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Version of the most recent deployment, used as the chart appVersion
    pub fn app_version(&self) -> String {
        self.spec
            .deployments
            .iter()
            .map(|d| d.version)
            .max()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "0".to_string())
    }

    pub fn chart_version(&self) -> String {
        format!("0.0.{}", self.metadata.generation.unwrap_or(1))
    }

    pub fn app_name(&self) -> String {
        self.name_any()
    }
}
