//! # Mesh Telemetry
//!
//! Observability plumbing for the agent mesh.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` bootstrap with env filter and JSON or
//!   human-readable output
//! - **Sinks**: the metric / span / audit interfaces the mesh emits through
//! - **Metrics**: a per-instance Prometheus registry implementing `MetricsSink`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::for_agent("erp");
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MESH_SERVICE_NAME` | `agent-mesh` | Service name in logs |
//! | `MESH_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `MESH_JSON_LOGS` | `false` | JSON output |
//! | `MESH_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
mod metrics;
mod sinks;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{names, GatewayMetrics};
pub use sinks::{
    AuditEvent, AuditSink, FinishedSpan, InMemoryAuditSink, InMemoryMetricsSink,
    InMemorySpanSink, MetricSample, MetricUnit, MetricsSink, SpanContext, SpanHandle, SpanSink,
    SpanStatus, TracingAuditSink, TracingMetricsSink, TracingSpanSink,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
