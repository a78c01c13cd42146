use crate::{App, Error};
use common::app::AppPhase;
use kube::ResourceExt;
use prometheus_client::{
    encoding::{EncodeLabelSet, text::encode},
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub app: String,
    pub error: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub phase: String,
}

#[derive(Clone)]
pub struct Metrics {
    pub runs: Counter,
    pub failures: Family<ErrorLabels, Counter>,
    pub phases: Family<PhaseLabels, Counter>,
    pub duration: Histogram,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("app_reconcile");
        let runs = Counter::default();
        let failures = Family::<ErrorLabels, Counter>::default();
        let phases = Family::<PhaseLabels, Counter>::default();
        let duration = Histogram::new([0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.].into_iter());
        registry.register_with_unit("duration", "reconcile duration", Unit::Seconds, duration.clone());
        registry.register("failures", "reconciliation errors", failures.clone());
        registry.register("phases", "reconciliation outcomes by phase", phases.clone());
        registry.register("runs", "reconciliations", runs.clone());
        Self {
            runs,
            failures,
            phases,
            duration,
            registry: Arc::new(registry),
        }
    }
}

impl Metrics {
    pub fn reconcile_failure(&self, app: &App, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                app: app.name_any(),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn reconcile_outcome(&self, phase: AppPhase) {
        self.phases
            .get_or_create(&PhaseLabels {
                phase: phase.to_string(),
            })
            .inc();
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.runs.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.duration.clone(),
        }
    }

    /// OpenMetrics text exposition of the registry
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::warn!("Encoding metrics failed with: {e}");
        }
        buffer
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.observe(duration);
    }
}
