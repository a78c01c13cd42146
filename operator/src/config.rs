use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Settings {
    /// Namespace holding the templates and the helm releases
    #[arg(
        short = 'n',
        long = "namespace",
        env = "SKIPPER_NAMESPACE",
        value_name = "NAMESPACE",
        default_value = "skipper-system"
    )]
    pub namespace: String,
    /// Helm binary to use
    #[arg(long = "helm-binary", env = "HELM_BINARY", value_name = "HELM_BINARY", default_value = "helm")]
    pub helm_binary: String,
    /// Address of the metrics and health server
    #[arg(
        short = 'l',
        long = "listen",
        env = "LISTEN_ADDRESS",
        value_name = "LISTEN_ADDRESS",
        default_value = "0.0.0.0:9000"
    )]
    pub listen: String,
    /// Maximum number of Apps reconciled at the same time
    #[arg(long = "concurrency", env = "RECONCILE_CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,
    /// Seconds between two reconciliations of a settled App
    #[arg(long = "resync-period", env = "RESYNC_PERIOD", default_value_t = 900)]
    pub resync_period: u64,
    /// Seconds before retrying a Pending App
    #[arg(long = "retry-period", env = "RETRY_PERIOD", default_value_t = 60)]
    pub retry_period: u64,
}

impl Settings {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_period)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_period)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: "skipper-system".to_string(),
            helm_binary: "helm".to_string(),
            listen: "0.0.0.0:9000".to_string(),
            concurrency: 4,
            resync_period: 900,
            retry_period: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let s = Settings::try_parse_from([
            "operator",
            "--namespace",
            "ops",
            "--retry-period",
            "5",
            "--concurrency",
            "16",
        ])
        .unwrap();
        assert_eq!(s.namespace, "ops");
        assert_eq!(s.retry(), Duration::from_secs(5));
        assert_eq!(s.concurrency, 16);
    }

    #[test]
    fn test_rejects_invalid_period() {
        assert!(Settings::try_parse_from(["operator", "--resync-period", "soon"]).is_err());
    }

    #[test]
    fn test_default_periods() {
        let s = Settings::default();
        assert_eq!(s.resync(), Duration::from_secs(900));
        assert_eq!(s.retry(), Duration::from_secs(60));
    }
}
