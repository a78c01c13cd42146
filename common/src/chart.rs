use crate::{
    Error, Result,
    app::{App, AppDeploymentSpec},
    pool::{IngressControllerType, Pool},
    templates::Templates,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// `.Values.app` of the chart
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AppValues {
    pub name: String,
    pub namespace: String,
    pub deployments: Vec<AppDeploymentSpec>,
}

/// `.Values.ingress` of the chart
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IngressValues {
    pub class_name: Option<String>,
    pub service_endpoint: Option<String>,
    #[serde(rename = "type")]
    pub ingress_type: IngressControllerType,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
pub struct ChartValues {
    pub app: AppValues,
    pub ingress: IngressValues,
}

/// Chart.yaml content
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub api_version: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub app_version: String,
}

impl ChartConfig {
    #[must_use]
    pub fn new(app: &App) -> Self {
        Self {
            api_version: "v2".to_string(),
            name: app.app_name(),
            description: format!("Chart of the {} application", app.app_name()),
            version: app.chart_version(),
            app_version: app.app_version(),
        }
    }
}

/// Everything needed to render the helm chart of an application
#[derive(Clone, Debug)]
pub struct ApplicationChart {
    values: ChartValues,
    templates: Templates,
}

impl ApplicationChart {
    #[must_use]
    pub fn new(app: &App, pool: &Pool, templates: Templates) -> Self {
        let ingress = &pool.spec.ingress_controller;
        Self {
            values: ChartValues {
                app: AppValues {
                    name: app.app_name(),
                    namespace: pool.spec.namespace_name.clone(),
                    deployments: app.spec.deployments.clone(),
                },
                ingress: IngressValues {
                    class_name: ingress.class_name.clone(),
                    service_endpoint: ingress.service_endpoint.clone(),
                    ingress_type: ingress.ingress_type.clone(),
                },
            },
            templates,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.values.app.name
    }

    pub fn namespace(&self) -> &str {
        &self.values.app.namespace
    }

    pub fn values(&self) -> &ChartValues {
        &self.values
    }

    /// Lay the chart out in `directory`: Chart.yaml, values.yaml and templates/
    pub fn write_to(&self, directory: &Path, config: &ChartConfig) -> Result<()> {
        fs::create_dir_all(directory).map_err(Error::Stdio)?;
        fs::write(
            directory.join("Chart.yaml"),
            serde_yaml::to_string(config).map_err(Error::YamlError)?,
        )
        .map_err(Error::Stdio)?;
        fs::write(
            directory.join("values.yaml"),
            serde_yaml::to_string(&self.values).map_err(Error::YamlError)?,
        )
        .map_err(Error::Stdio)?;
        self.templates.export_to_directory(&directory.join("templates"))
    }
}
