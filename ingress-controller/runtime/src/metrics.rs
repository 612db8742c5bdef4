use crate::core::{AdmissionTiming, MetricsSink};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::atomic::AtomicU64;

/// Prometheus metrics describing admission checks.
#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    checks: Family<IngressLabels, Counter>,
    check_errors: Family<IngressLabels, Counter>,
    tested_ingresses: Gauge<f64, AtomicU64>,
    tested_duration: Gauge<f64, AtomicU64>,
    render_ingresses: Gauge<f64, AtomicU64>,
    render_duration: Gauge<f64, AtomicU64>,
    config_size: Gauge<f64, AtomicU64>,
    roundtrip_duration: Gauge<f64, AtomicU64>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IngressLabels {
    namespace: String,
    ingress: String,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let checks = Family::default();
        prom.register(
            "checks",
            "Count of resources that passed admission checks",
            checks.clone(),
        );

        let check_errors = Family::default();
        prom.register(
            "check_errors",
            "Count of resources that failed admission checks",
            check_errors.clone(),
        );

        let gauge = |prom: &mut Registry, name: &str, help: &str| {
            let gauge = Gauge::<f64, AtomicU64>::default();
            prom.register(name, help, gauge.clone());
            gauge
        };
        let tested_ingresses = gauge(
            prom,
            "tested_ingresses",
            "The number of resources tested by the last admission check",
        );
        let tested_duration = gauge(
            prom,
            "tested_duration_seconds",
            "The time taken to synthesize, render and check the last admitted configuration",
        );
        let render_ingresses = gauge(
            prom,
            "render_ingresses",
            "The number of resources synthesized by the last admission check",
        );
        let render_duration = gauge(
            prom,
            "render_duration_seconds",
            "The time taken to check policy and list resources for the last admission",
        );
        let config_size = gauge(
            prom,
            "config_size_bytes",
            "The size of the last admitted rendered configuration",
        );
        let roundtrip_duration = gauge(
            prom,
            "roundtrip_duration_seconds",
            "The total time taken by the last admission check",
        );

        Self {
            checks,
            check_errors,
            tested_ingresses,
            tested_duration,
            render_ingresses,
            render_duration,
            config_size,
            roundtrip_duration,
        }
    }
}

impl MetricsSink for AdmissionMetrics {
    fn inc_check_count(&self, namespace: &str, name: &str) {
        self.checks
            .get_or_create(&IngressLabels {
                namespace: namespace.to_string(),
                ingress: name.to_string(),
            })
            .inc();
    }

    fn inc_check_error_count(&self, namespace: &str, name: &str) {
        self.check_errors
            .get_or_create(&IngressLabels {
                namespace: namespace.to_string(),
                ingress: name.to_string(),
            })
            .inc();
    }

    fn set_admission_metrics(&self, timing: AdmissionTiming) {
        self.tested_ingresses.set(timing.tested_ingresses);
        self.tested_duration.set(timing.tested_duration);
        self.render_ingresses.set(timing.render_ingresses);
        self.render_duration.set(timing.render_duration);
        self.config_size.set(timing.config_size);
        self.roundtrip_duration.set(timing.roundtrip_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_checks() {
        let mut prom = Registry::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        metrics.inc_check_count("ns-0", "web");
        metrics.inc_check_count("ns-0", "web");
        metrics.inc_check_error_count("ns-0", "api");
        metrics.set_admission_metrics(AdmissionTiming {
            tested_ingresses: 3.0,
            config_size: 512.0,
            ..Default::default()
        });

        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &prom).unwrap();
        assert!(out.contains(r#"admission_checks_total{namespace="ns-0",ingress="web"} 2"#));
        assert!(out.contains(r#"admission_check_errors_total{namespace="ns-0",ingress="api"} 1"#));
        assert!(out.contains("admission_tested_ingresses 3.0"), "{out}");
        assert!(out.contains("admission_config_size_bytes 512.0"), "{out}");
    }
}
