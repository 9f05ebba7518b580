//! Prometheus metrics surface (spec §6): reconcile count and latency, AWS API
//! call counts, admission-webhook rejection counts, and a managed-ingress
//! gauge. Grounded on `ibotty-kube-redirect-operator`'s `ReconcileMetrics` —
//! same `Counter`/`Family`/`Histogram` shapes, same drop-based latency
//! measurer — generalized from one redirect reconcile to this crate's
//! group/AWS-call/webhook surfaces.

use std::sync::Arc;
use std::time::Instant;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};

#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub aws: AwsCallMetrics,
    pub webhook: WebhookMetrics,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("alb_ingress_reconciler");
        let reconcile = ReconcileMetrics::default().register(&mut registry);
        let aws = AwsCallMetrics::default().register(&mut registry);
        let webhook = WebhookMetrics::default().register(&mut registry);
        Self { registry: Arc::new(registry), reconcile, aws, webhook }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GroupLabel {
    pub group: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileErrorLabels {
    pub group: String,
    pub error: String,
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Counter,
    pub failures: Family<ReconcileErrorLabels, Counter>,
    pub duration: Family<GroupLabel, Histogram>,
    pub managed_ingresses: Gauge,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Counter::default(),
            failures: Family::default(),
            duration: Family::new_with_constructor(|| Histogram::new([0.05, 0.1, 0.25, 0.5, 1., 2.5, 5., 15., 60.])),
            managed_ingresses: Gauge::default(),
        }
    }
}

impl ReconcileMetrics {
    /// Increments the run counter and returns a measurer that records the
    /// elapsed duration against `group`'s histogram when it's dropped —
    /// whichever return path the caller takes (`Ok`, `Err`, early return).
    pub fn count_and_measure(&self, group: &str) -> ReconcileMeasurer {
        self.runs.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.duration.get_or_create(&GroupLabel { group: group.to_string() }).clone(),
        }
    }

    pub fn set_failure(&self, group: &str, error_label: &'static str) {
        self.failures.get_or_create(&ReconcileErrorLabels { group: group.to_string(), error: error_label.to_string() }).inc();
    }

    fn register(self, r: &mut Registry) -> Self {
        r.register("reconciles", "total reconcile attempts", self.runs.clone());
        r.register("reconcile_failures", "reconcile failures by group and error kind", self.failures.clone());
        r.register_with_unit("reconcile_duration", "reconcile duration by group", Unit::Seconds, self.duration.clone());
        r.register("managed_ingresses", "ingresses currently admitted into a managed group", self.managed_ingresses.clone());
        self
    }
}

pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric.observe(duration);
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AwsCallLabels {
    pub operation: String,
    pub outcome: &'static str,
}

#[derive(Clone, Default)]
pub struct AwsCallMetrics {
    pub calls: Family<AwsCallLabels, Counter>,
}

impl AwsCallMetrics {
    pub fn record(&self, operation: &str, outcome: &'static str) {
        self.calls.get_or_create(&AwsCallLabels { operation: operation.to_string(), outcome }).inc();
    }

    fn register(self, r: &mut Registry) -> Self {
        r.register("aws_api_calls", "AWS Gateway calls by operation and outcome", self.calls.clone());
        self
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WebhookRejectionLabels {
    pub endpoint: String,
    pub reason: String,
}

#[derive(Clone, Default)]
pub struct WebhookMetrics {
    pub rejections: Family<WebhookRejectionLabels, Counter>,
}

impl WebhookMetrics {
    pub fn record_rejection(&self, endpoint: &str, reason: &str) {
        self.rejections.get_or_create(&WebhookRejectionLabels { endpoint: endpoint.to_string(), reason: reason.to_string() }).inc();
    }

    fn register(self, r: &mut Registry) -> Self {
        r.register("webhook_rejections", "admission webhook rejections by endpoint and reason", self.rejections.clone());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurer_records_a_sample_on_drop() {
        let metrics = ReconcileMetrics::default();
        {
            let _m = metrics.count_and_measure("default/web");
        }
        let mut buffer = String::new();
        let mut registry = Registry::default();
        registry.register("reconcile_duration", "test", metrics.duration.clone());
        prometheus_client::encoding::text::encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("reconcile_duration"));
    }

    #[test]
    fn aws_call_counter_increments_per_operation() {
        let metrics = AwsCallMetrics::default();
        metrics.record("create_load_balancer", "ok");
        metrics.record("create_load_balancer", "ok");
        metrics.record("create_load_balancer", "error");
        assert_eq!(
            metrics.calls.get_or_create(&AwsCallLabels { operation: "create_load_balancer".to_string(), outcome: "ok" }).get(),
            2
        );
    }

    #[test]
    fn webhook_rejection_counter_is_labeled_by_endpoint_and_reason() {
        let metrics = WebhookMetrics::default();
        metrics.record_rejection("/validate-ingress", "priority_collision");
        assert_eq!(
            metrics
                .rejections
                .get_or_create(&WebhookRejectionLabels {
                    endpoint: "/validate-ingress".to_string(),
                    reason: "priority_collision".to_string(),
                })
                .get(),
            1
        );
    }
}
