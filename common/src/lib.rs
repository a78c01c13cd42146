use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Finalizer error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Stdio error {0}")]
    Stdio(#[from] std::io::Error),

    #[error("UTF8 error {0}")]
    UTF8(#[from] std::string::FromUtf8Error),

    #[error("configmap \"{0}\" is not found")]
    TemplatesNotFound(String),

    #[error("{0}")]
    HelmError(String),

    #[error("too many conflicts while updating pool \"{0}\"")]
    PoolConflict(String),

    #[error("{0}")]
    Other(String),
}
impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod app;
pub mod chart;
pub mod context;
pub mod helmhandler;
pub mod memorypool;
pub mod pool;
pub mod templates;
pub use context::get_client_name;
