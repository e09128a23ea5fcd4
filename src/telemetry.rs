// src/telemetry.rs

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

// ---
// Logging
// ---

/// Installs the global subscriber. Only the binary calls this; library code
/// and tests just emit events.
pub fn init_tracing(format: LogFormat, local_debug: bool) {
    let default_directive = if local_debug {
        "store_service=debug,tower_http=debug"
    } else {
        "store_service=info,tower_http=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).compact())
            .init(),
    }
}

// ---
// Metrics
// ---

/// Receives one observation per store operation and per RPC call.
pub trait MetricsSink: Send + Sync {
    fn record_success(&self, operation: &'static str, elapsed: Duration);
    fn record_error(&self, operation: &'static str, elapsed: Duration);
    /// An RPC entered the service. Always paired with `rpc_finished`.
    fn rpc_started(&self);
    fn rpc_finished(&self, service: &str, method: &str, status_code: &str, elapsed: Duration);
    /// Text exposition for `/metrics`; empty when nothing is collected.
    fn render(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_success(&self, _operation: &'static str, _elapsed: Duration) {}
    fn record_error(&self, _operation: &'static str, _elapsed: Duration) {}
    fn rpc_started(&self) {}
    fn rpc_finished(&self, _service: &str, _method: &str, _status_code: &str, _elapsed: Duration) {}
    fn render(&self) -> String {
        String::new()
    }
}

/// Store and RPC series on a private registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    operations: IntCounterVec,
    errors: IntCounterVec,
    duration: HistogramVec,
    calls: IntCounterVec,
    call_duration: HistogramVec,
    in_flight: IntGauge,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("store_operations_total", "Total number of store operations"),
            &["operation"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("store_operation_errors_total", "Total number of store operation errors"),
            &["operation"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "store_operation_duration_seconds",
                "Store operation duration in seconds",
            ),
            &["operation"],
        )?;

        let calls = IntCounterVec::new(
            Opts::new("grpc_server_calls_total", "Total number of RPC calls"),
            &["service", "method", "status_code"],
        )?;
        let call_duration = HistogramVec::new(
            HistogramOpts::new(
                "grpc_server_call_duration_seconds",
                "RPC call duration in seconds",
            ),
            &["service", "method"],
        )?;
        let in_flight = IntGauge::new(
            "grpc_server_calls_in_flight",
            "Number of RPC calls currently being served",
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(call_duration.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            registry,
            operations,
            errors,
            duration,
            calls,
            call_duration,
            in_flight,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_success(&self, operation: &'static str, elapsed: Duration) {
        self.operations.with_label_values(&[operation]).inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    fn record_error(&self, operation: &'static str, elapsed: Duration) {
        self.operations.with_label_values(&[operation]).inc();
        self.errors.with_label_values(&[operation]).inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    fn rpc_started(&self) {
        self.in_flight.inc();
    }

    fn rpc_finished(&self, service: &str, method: &str, status_code: &str, elapsed: Duration) {
        self.in_flight.dec();
        self.calls
            .with_label_values(&[service, method, status_code])
            .inc();
        self.call_duration
            .with_label_values(&[service, method])
            .observe(elapsed.as_secs_f64());
    }

    fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_sink_renders_store_series() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_success("create", Duration::from_millis(3));
        metrics.record_error("get", Duration::from_millis(1));

        let text = metrics.render();
        assert!(text.contains(r#"store_operations_total{operation="create"} 1"#));
        assert!(text.contains(r#"store_operation_errors_total{operation="get"} 1"#));
        assert!(text.contains("store_operation_duration_seconds_bucket"));
    }

    #[test]
    fn prometheus_sink_renders_rpc_series() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.rpc_started();
        metrics.rpc_started();
        assert!(metrics.render().contains("grpc_server_calls_in_flight 2"));

        metrics.rpc_finished("store.v1.StoreService", "GetItem", "NOT_FOUND", Duration::from_millis(2));
        metrics.rpc_finished("store.v1.StoreService", "GetItem", "OK", Duration::from_millis(1));

        let text = metrics.render();
        assert!(text.contains("grpc_server_calls_in_flight 0"));
        let calls: Vec<&str> = text
            .lines()
            .filter(|line| line.starts_with("grpc_server_calls_total{"))
            .collect();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|line| line.contains(r#"method="GetItem""#)
            && line.contains(r#"service="store.v1.StoreService""#)
            && line.ends_with(" 1")));
        assert!(calls.iter().any(|line| line.contains(r#"status_code="NOT_FOUND""#)));
        assert!(calls.iter().any(|line| line.contains(r#"status_code="OK""#)));
        assert!(text.contains("grpc_server_call_duration_seconds_count{"));
    }

    #[test]
    fn separate_sinks_do_not_share_a_registry() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();
        a.record_success("list_items", Duration::ZERO);
        assert!(!b.render().contains(r#"operation="list_items""#));
    }
}
