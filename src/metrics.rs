use crate::conditions::ReasonType;
use crate::k8s_types::K8sType;

use prometheus::{
    exponential_buckets,
    Histogram,
    HistogramOpts,
    HistogramTimer,
    IntCounter,
    IntCounterVec,
    Opts,
    Registry,
};

use std::fmt::{self, Debug};

const KIND: &[&str] = &["kind"];
const KIND_AND_REASON: &[&str] = &["kind", "reason"];

/// Counters for the reconciliation engine. Cloning is cheap, and clones share the same registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pass_duration: Histogram,
    passes_by_kind: IntCounterVec,
    pass_errors_by_kind: IntCounterVec,
    created_by_kind: IntCounterVec,
    updates_by_kind: IntCounterVec,
    builds_triggered: IntCounter,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();

        // 5ms up to ~10s
        let duration_opts = HistogramOpts::new("pass_duration_seconds",
                "Total time taken by one reconciliation pass, including every cluster call")
                .subsystem("reconcile")
                .buckets(exponential_buckets(0.005, 2.0, 12).unwrap());
        let pass_duration = Histogram::with_opts(duration_opts).unwrap();
        registry.register(Box::new(pass_duration.clone())).unwrap();

        let passes_opts = Opts::new("passes", "the number of reconciliation passes by custom resource kind")
                .subsystem("reconcile")
                .variable_label("kind");
        let passes_by_kind = IntCounterVec::new(passes_opts, KIND).unwrap();
        registry.register(Box::new(passes_by_kind.clone())).unwrap();

        let errors_opts = Opts::new("pass_errors", "the number of failed passes by custom resource kind and reason")
                .subsystem("reconcile")
                .variable_label("kind")
                .variable_label("reason");
        let pass_errors_by_kind = IntCounterVec::new(errors_opts, KIND_AND_REASON).unwrap();
        registry.register(Box::new(pass_errors_by_kind.clone())).unwrap();

        let created_opts = Opts::new("resources_created", "the number of resources created by kind")
                .variable_label("kind");
        let created_by_kind = IntCounterVec::new(created_opts, KIND).unwrap();
        registry.register(Box::new(created_by_kind.clone())).unwrap();

        let updates_opts = Opts::new("resource_updates", "the number of updates issued for existing resources by kind")
                .variable_label("kind");
        let updates_by_kind = IntCounterVec::new(updates_opts, KIND).unwrap();
        registry.register(Box::new(updates_by_kind.clone())).unwrap();

        let builds_opts = Opts::new("builds_triggered", "the number of builds started by the operator");
        let builds_triggered = IntCounter::with_opts(builds_opts).unwrap();
        registry.register(Box::new(builds_triggered.clone())).unwrap();

        Metrics {
            registry,
            pass_duration,
            passes_by_kind,
            pass_errors_by_kind,
            created_by_kind,
            updates_by_kind,
            builds_triggered,
        }
    }

    /// Counts a pass and times it until the returned timer is dropped
    pub fn pass_started(&self, k8s_type: &K8sType) -> HistogramTimer {
        self.passes_by_kind.with_label_values(&[k8s_type.kind]).inc();
        self.pass_duration.start_timer()
    }

    pub fn pass_error(&self, k8s_type: &K8sType, reason: ReasonType) {
        let reason = reason.to_string();
        self.pass_errors_by_kind
            .with_label_values(&[k8s_type.kind, reason.as_str()])
            .inc();
    }

    pub fn resource_created(&self, k8s_type: &K8sType) {
        self.created_by_kind.with_label_values(&[k8s_type.kind]).inc();
    }

    pub fn resource_updated(&self, k8s_type: &K8sType) {
        self.updates_by_kind.with_label_values(&[k8s_type.kind]).inc();
    }

    pub fn build_triggered(&self) {
        self.builds_triggered.inc();
    }

    pub fn created_count(&self, k8s_type: &K8sType) -> i64 {
        self.created_by_kind.with_label_values(&[k8s_type.kind]).get()
    }

    pub fn update_count(&self, k8s_type: &K8sType) -> i64 {
        self.updates_by_kind.with_label_values(&[k8s_type.kind]).get()
    }

    pub fn builds_triggered_count(&self) -> i64 {
        self.builds_triggered.get()
    }

    pub fn encode_as_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(self.registry.gather().as_slice(), &mut buffer)?;
        Ok(buffer)
    }
}
