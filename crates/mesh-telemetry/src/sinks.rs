//! # Collaborator Sinks
//!
//! The mesh never talks to a metrics, tracing or audit vendor directly. It
//! emits through three narrow interfaces:
//!
//! | Trait         | Operation                                         |
//! |---------------|---------------------------------------------------|
//! | `MetricsSink` | `emit_metric(name, value, unit, dimensions, tenant)` |
//! | `SpanSink`    | `start_span(name, context)` / `end_span(span, status)` |
//! | `AuditSink`   | `append_audit_event(event)`                       |
//!
//! Tracing-backed implementations are the defaults; in-memory ones record
//! everything for assertions.

use chrono::{DateTime, Utc};
use mesh_types::Severity;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// METRICS
// =============================================================================

/// Unit attached to an emitted metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Count,
    Seconds,
    Milliseconds,
    Bytes,
    /// Dimensionless gauge value.
    Value,
}

impl MetricUnit {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Count => "count",
            MetricUnit::Seconds => "seconds",
            MetricUnit::Milliseconds => "milliseconds",
            MetricUnit::Bytes => "bytes",
            MetricUnit::Value => "value",
        }
    }
}

/// Receives metric samples.
pub trait MetricsSink: Send + Sync {
    fn emit_metric(
        &self,
        name: &str,
        value: f64,
        unit: MetricUnit,
        dimensions: &[(&str, &str)],
        tenant: Option<&str>,
    );
}

/// Writes every sample as a `debug` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit_metric(
        &self,
        name: &str,
        value: f64,
        unit: MetricUnit,
        dimensions: &[(&str, &str)],
        tenant: Option<&str>,
    ) {
        debug!(
            metric = name,
            value = value,
            unit = unit.as_str(),
            dimensions = ?dimensions,
            tenant_id = tenant.unwrap_or(""),
            "metric"
        );
    }
}

/// A recorded metric sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub dimensions: Vec<(String, String)>,
    pub tenant: Option<String>,
}

impl MetricSample {
    #[must_use]
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps every sample in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    samples: Mutex<Vec<MetricSample>>,
}

impl InMemoryMetricsSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    /// Samples with the given metric name.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<MetricSample> {
        self.samples
            .lock()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn emit_metric(
        &self,
        name: &str,
        value: f64,
        unit: MetricUnit,
        dimensions: &[(&str, &str)],
        tenant: Option<&str>,
    ) {
        self.samples.lock().push(MetricSample {
            name: name.to_string(),
            value,
            unit,
            dimensions: dimensions
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            tenant: tenant.map(str::to_string),
        });
    }
}

// =============================================================================
// SPANS
// =============================================================================

/// Context a span is opened in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: String,
    pub tenant_id: String,
    pub attributes: Vec<(String, String)>,
}

impl SpanContext {
    pub fn new(trace_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            tenant_id: tenant_id.into(),
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

/// Handle for an open span.
#[derive(Debug)]
pub struct SpanHandle {
    pub span_id: u64,
    pub name: String,
    pub context: SpanContext,
    started: Instant,
}

impl SpanHandle {
    #[must_use]
    pub fn new(span_id: u64, name: impl Into<String>, context: SpanContext) -> Self {
        Self {
            span_id,
            name: name.into(),
            context,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Receives span boundaries.
pub trait SpanSink: Send + Sync {
    fn start_span(&self, name: &str, context: SpanContext) -> SpanHandle;
    fn end_span(&self, span: SpanHandle, status: SpanStatus);
}

/// Logs span start/end as `debug` events.
#[derive(Debug, Default)]
pub struct TracingSpanSink {
    next_id: AtomicU64,
}

impl SpanSink for TracingSpanSink {
    fn start_span(&self, name: &str, context: SpanContext) -> SpanHandle {
        let span_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(span = name, span_id = span_id, trace_id = %context.trace_id, "span started");
        SpanHandle::new(span_id, name, context)
    }

    fn end_span(&self, span: SpanHandle, status: SpanStatus) {
        debug!(
            span = %span.name,
            span_id = span.span_id,
            trace_id = %span.context.trace_id,
            status = ?status,
            duration_ms = span.elapsed_ms() as u64,
            "span ended"
        );
    }
}

/// A span that has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSpan {
    pub span_id: u64,
    pub name: String,
    pub context: SpanContext,
    pub status: SpanStatus,
}

/// Records finished spans in memory.
#[derive(Debug, Default)]
pub struct InMemorySpanSink {
    next_id: AtomicU64,
    finished: Mutex<Vec<FinishedSpan>>,
}

impl InMemorySpanSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.finished.lock().clone()
    }

    /// Spans opened but not yet ended.
    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - self.finished.lock().len() as u64
    }
}

impl SpanSink for InMemorySpanSink {
    fn start_span(&self, name: &str, context: SpanContext) -> SpanHandle {
        let span_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        SpanHandle::new(span_id, name, context)
    }

    fn end_span(&self, span: SpanHandle, status: SpanStatus) {
        self.finished.lock().push(FinishedSpan {
            span_id: span.span_id,
            name: span.name,
            context: span.context,
            status,
        });
    }
}

// =============================================================================
// AUDIT
// =============================================================================

/// A security-relevant event destined for durable audit storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Short machine-readable category, e.g. the error code.
    pub category: String,
    pub message: String,
    pub trace_id: Option<String>,
    pub tenant_id: Option<String>,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            category: category.into(),
            message: message.into(),
            trace_id: None,
            tenant_id: None,
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace_id: Option<String>, tenant_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self.tenant_id = tenant_id;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Append-only audit destination.
pub trait AuditSink: Send + Sync {
    fn append_audit_event(&self, event: AuditEvent);
}

/// Logs audit events at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append_audit_event(&self, event: AuditEvent) {
        let trace_id = event.trace_id.as_deref().unwrap_or("");
        let tenant_id = event.tenant_id.as_deref().unwrap_or("");
        match event.severity {
            Severity::Critical | Severity::High => error!(
                audit = true,
                event_id = %event.event_id,
                category = %event.category,
                severity = ?event.severity,
                trace_id = trace_id,
                tenant_id = tenant_id,
                "{}",
                event.message
            ),
            Severity::Medium => warn!(
                audit = true,
                event_id = %event.event_id,
                category = %event.category,
                trace_id = trace_id,
                tenant_id = tenant_id,
                "{}",
                event.message
            ),
            Severity::Low => info!(
                audit = true,
                event_id = %event.event_id,
                category = %event.category,
                trace_id = trace_id,
                tenant_id = tenant_id,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps audit events in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append_audit_event(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
