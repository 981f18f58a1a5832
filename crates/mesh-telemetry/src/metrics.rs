//! Prometheus metrics for a gateway instance.
//!
//! All metrics follow the naming convention: `<namespace>_<area>_<metric>_<unit>`
//!
//! Each `GatewayMetrics` owns its own `Registry`, so several gateways in one
//! process (or one test binary) never collide.
//!
//! ## Metric Types
//!
//! - **Counter**: calls, access decisions, translated errors
//! - **Gauge**: circuit breaker state per service
//! - **Histogram**: outbound call duration

use prometheus::{
    exponential_buckets, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};

use crate::sinks::{MetricUnit, MetricsSink};
use crate::TelemetryError;

/// Metric names the gateway emits through `MetricsSink`.
pub mod names {
    /// Outbound call finished. Dimensions: `target`, `outcome`.
    pub const CALL: &str = "gateway.call";
    /// Outbound call duration in seconds. Dimensions: `target`.
    pub const CALL_DURATION: &str = "gateway.call_duration";
    /// Isolation decision. Dimensions: `decision`.
    pub const ACCESS_DECISION: &str = "isolation.decision";
    /// Error translated. Dimensions: `code`.
    pub const ERROR: &str = "error.translated";
    /// Breaker state (0 closed, 1 half-open, 2 open). Dimensions: `service`.
    pub const BREAKER_STATE: &str = "breaker.state";
    /// Inbound call admitted or rejected. Dimensions: `tool`, `outcome`.
    pub const INBOUND: &str = "gateway.inbound";
}

/// Prometheus-backed metrics sink.
pub struct GatewayMetrics {
    registry: Registry,
    calls: CounterVec,
    inbound: CounterVec,
    decisions: CounterVec,
    errors: CounterVec,
    breaker_state: GaugeVec,
    call_duration: HistogramVec,
    other: CounterVec,
}

impl GatewayMetrics {
    /// Register all metrics under `namespace`.
    ///
    /// # Errors
    ///
    /// `TelemetryError::MetricsInit` if a metric cannot be created.
    pub fn new(namespace: &str) -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let calls = CounterVec::new(
            Opts::new("gateway_calls_total", "Outbound tool calls by target and outcome")
                .namespace(namespace),
            &["target", "outcome"],
        )
        .map_err(init_err)?;

        let inbound = CounterVec::new(
            Opts::new("gateway_inbound_total", "Inbound tool calls by tool and outcome")
                .namespace(namespace),
            &["tool", "outcome"],
        )
        .map_err(init_err)?;

        let decisions = CounterVec::new(
            Opts::new("isolation_decisions_total", "Tenant isolation decisions")
                .namespace(namespace),
            &["decision"],
        )
        .map_err(init_err)?;

        let errors = CounterVec::new(
            Opts::new("errors_total", "Translated errors by unified code").namespace(namespace),
            &["code"],
        )
        .map_err(init_err)?;

        let breaker_state = GaugeVec::new(
            Opts::new(
                "breaker_state",
                "Circuit breaker state (0=closed, 1=half_open, 2=open)",
            )
            .namespace(namespace),
            &["service"],
        )
        .map_err(init_err)?;

        let buckets = exponential_buckets(0.001, 2.0, 15).map_err(init_err)?;
        let call_duration = HistogramVec::new(
            HistogramOpts::new("gateway_call_duration_seconds", "Outbound call duration")
                .namespace(namespace)
                .buckets(buckets),
            &["target"],
        )
        .map_err(init_err)?;

        let other = CounterVec::new(
            Opts::new("events_total", "Other emitted metrics by name").namespace(namespace),
            &["metric"],
        )
        .map_err(init_err)?;

        registry.register(Box::new(calls.clone())).map_err(init_err)?;
        registry.register(Box::new(inbound.clone())).map_err(init_err)?;
        registry.register(Box::new(decisions.clone())).map_err(init_err)?;
        registry.register(Box::new(errors.clone())).map_err(init_err)?;
        registry.register(Box::new(breaker_state.clone())).map_err(init_err)?;
        registry.register(Box::new(call_duration.clone())).map_err(init_err)?;
        registry.register(Box::new(other.clone())).map_err(init_err)?;

        Ok(Self {
            registry,
            calls,
            inbound,
            decisions,
            errors,
            breaker_state,
            call_duration,
            other,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every metric in this instance.
    ///
    /// # Errors
    ///
    /// `TelemetryError::MetricsInit` if encoding fails.
    pub fn gather_text(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(init_err)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
    }
}

impl MetricsSink for GatewayMetrics {
    fn emit_metric(
        &self,
        name: &str,
        value: f64,
        _unit: MetricUnit,
        dimensions: &[(&str, &str)],
        _tenant: Option<&str>,
    ) {
        // Counters only move forward.
        let count = value.max(0.0);
        match name {
            names::CALL => self
                .calls
                .with_label_values(&[dim(dimensions, "target"), dim(dimensions, "outcome")])
                .inc_by(count),
            names::INBOUND => self
                .inbound
                .with_label_values(&[dim(dimensions, "tool"), dim(dimensions, "outcome")])
                .inc_by(count),
            names::CALL_DURATION => self
                .call_duration
                .with_label_values(&[dim(dimensions, "target")])
                .observe(value),
            names::ACCESS_DECISION => self
                .decisions
                .with_label_values(&[dim(dimensions, "decision")])
                .inc_by(count),
            names::ERROR => self
                .errors
                .with_label_values(&[dim(dimensions, "code")])
                .inc_by(count),
            names::BREAKER_STATE => self
                .breaker_state
                .with_label_values(&[dim(dimensions, "service")])
                .set(value),
            other => self.other.with_label_values(&[other]).inc_by(count),
        }
    }
}

fn dim<'a>(dimensions: &'a [(&'a str, &'a str)], key: &str) -> &'a str {
    dimensions
        .iter()
        .find(|(k, _)| *k == key)
        .map_or("unknown", |(_, v)| *v)
}

fn init_err(e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsInit(e.to_string())
}
