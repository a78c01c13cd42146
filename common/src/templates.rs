//! Storage of the helm chart templates used to render applications.
//!
//! A templates bundle is stored as a ConfigMap in the operator namespace, one
//! data entry per file of the chart `templates/` folder:
//!
//! ```yaml
//! apiVersion: v1
//! kind: ConfigMap
//! metadata:
//!   name: templates-default
//!   namespace: skipper-system
//! data:
//!   deployment.yaml: |-
//!     ..
//!   service.yaml: |-
//!     ..
//! ```
use crate::{Error, Result, get_client_name};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Content of a helm chart "templates/" folder
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, Default)]
pub struct Templates {
    /// File name to file content
    pub yamls: BTreeMap<String, String>,
}

impl Templates {
    /// Templates shipped with the operator, stored under `templates-default`
    #[must_use]
    pub fn builtin() -> Self {
        let yamls = [
            ("deployment.yaml", include_str!("../templates/default/deployment.yaml")),
            ("service.yaml", include_str!("../templates/default/service.yaml")),
            ("ingress.yaml", include_str!("../templates/default/ingress.yaml")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { yamls }
    }

    /// Write one file per template into `directory`.
    /// The previous content of the directory is removed.
    pub fn export_to_directory(&self, directory: &Path) -> Result<()> {
        match fs::remove_dir_all(directory) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Stdio(e)),
        }
        fs::create_dir_all(directory).map_err(Error::Stdio)?;
        for (filename, content) in &self.yamls {
            fs::write(directory.join(filename), content).map_err(Error::Stdio)?;
        }
        Ok(())
    }

    /// Read every file of `directory` (sub-directories are skipped)
    pub fn read_directory(directory: &Path) -> Result<Self> {
        let mut yamls = BTreeMap::new();
        for entry in fs::read_dir(directory).map_err(Error::Stdio)? {
            let entry = entry.map_err(Error::Stdio)?;
            if entry.file_type().map_err(Error::Stdio)?.is_dir() {
                continue;
            }
            let content = fs::read(entry.path()).map_err(Error::Stdio)?;
            let content = String::from_utf8(content).map_err(Error::UTF8)?;
            yamls.insert(entry.file_name().to_string_lossy().to_string(), content);
        }
        Ok(Self { yamls })
    }

    fn to_config_map(&self, name: &str, namespace: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    "skipper".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            data: Some(self.yamls.clone()),
            ..ConfigMap::default()
        }
    }
}

/// Name of a configmap holding templates dedicated to one application
pub fn app_templates_key(app: &str) -> String {
    let hash = sha256::digest(format!("app-{app}-templates-{}", Utc::now().to_rfc3339()));
    format!("app-{app}-templates-{}", &hash[..16])
}

/// Knows how to get templates
#[async_trait]
pub trait TemplateReader: Send + Sync {
    async fn get(&self, name: &str) -> Result<Templates>;
}

/// Knows how to update and delete templates
#[async_trait]
pub trait TemplateUpdater: Send + Sync {
    /// Create the bundle, or replace all of its content
    async fn update(&self, name: &str, templates: &Templates) -> Result<()>;
    /// Deleting a missing bundle is not an error
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Templates stored in configmaps of a namespace
#[derive(Clone)]
pub struct ConfigMapStorage {
    api: Api<ConfigMap>,
    namespace: String,
}

impl ConfigMapStorage {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl TemplateReader for ConfigMapStorage {
    async fn get(&self, name: &str) -> Result<Templates> {
        match self.api.get_opt(name).await.map_err(Error::KubeError)? {
            Some(cm) => Ok(Templates {
                yamls: cm.data.unwrap_or_default(),
            }),
            None => Err(Error::TemplatesNotFound(name.to_string())),
        }
    }
}

/// Write storing a bundle, given the configmap currently stored
#[derive(Debug, PartialEq)]
enum ConfigMapWrite {
    Create(ConfigMap),
    Replace(ConfigMap),
}

fn plan_write(current: Option<ConfigMap>, mut desired: ConfigMap) -> ConfigMapWrite {
    match current {
        None => ConfigMapWrite::Create(desired),
        Some(current) => {
            desired.metadata.resource_version = current.metadata.resource_version;
            ConfigMapWrite::Replace(desired)
        }
    }
}

fn ignore_not_found<T>(res: std::result::Result<T, kube::Error>) -> Result<()> {
    match res {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

#[async_trait]
impl TemplateUpdater for ConfigMapStorage {
    async fn update(&self, name: &str, templates: &Templates) -> Result<()> {
        let desired = templates.to_config_map(name, &self.namespace);
        let current = self.api.get_opt(name).await.map_err(Error::KubeError)?;
        let pp = PostParams {
            field_manager: Some(get_client_name()),
            ..PostParams::default()
        };
        match plan_write(current, desired) {
            ConfigMapWrite::Create(cm) => {
                tracing::info!("Creating templates {}/{name}", self.namespace);
                self.api.create(&pp, &cm).await.map_err(Error::KubeError)?;
            }
            ConfigMapWrite::Replace(cm) => {
                tracing::info!("Replacing templates {}/{name}", self.namespace);
                self.api.replace(name, &pp, &cm).await.map_err(Error::KubeError)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        ignore_not_found(self.api.delete(name, &DeleteParams::default()).await)
    }
}
