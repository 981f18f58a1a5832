//! # Error Translation Layer
//!
//! Turns every failure the gateway can observe into a [`UnifiedError`].
//!
//! ## Classification
//!
//! | Raw failure                 | Code                         | Recoverable |
//! |-----------------------------|------------------------------|-------------|
//! | `Timeout`                   | `communication_timeout`      | yes         |
//! | `Transport`                 | `communication_failure`      | yes         |
//! | `BreakerOpen`               | `circuit_breaker_open`       | yes         |
//! | `Unavailable` / `Degraded`  | `service_unavailable`        | yes         |
//! | `ToolTimeout`               | `tool_timeout`               | yes         |
//! | `Validation`                | `data_validation_failed`     | no          |
//! | `ToolExecution`             | `tool_execution_failed`      | no          |
//! | `ToolNotFound`              | `tool_not_found`             | no          |
//! | `Compliance`                | `compliance_violation`       | no          |
//! | `Authentication`            | `authentication_failed`      | no          |
//! | `Isolation` (cross-tenant)  | `cross_tenant_violation`     | no          |
//! | `Isolation` (other)         | `tenant_isolation_violation` | no          |
//! | `Configuration` / `Internal`| `system_error`               | no          |
//!
//! Codes of high or critical severity are escalated to the audit sink.

use crate::domain::config::ConfigError;
use crate::middleware::circuit_breaker::BreakerError;
use dashmap::DashMap;
use mesh_bus::TransportError;
use mesh_security::{IsolationError, SigningError};
use mesh_telemetry::{names, AuditEvent, AuditSink, MetricUnit, MetricsSink};
use mesh_types::{Headers, UnifiedError, UnifiedErrorCode};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A failure before classification.
#[derive(Debug, Error)]
pub enum RawFailure {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("circuit breaker for {service} is open")]
    BreakerOpen { service: String, retry_after: Duration },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("tool {tool} is not available on {agent}")]
    ToolNotFound { agent: String, tool: String },

    #[error("tool {tool} exceeded its {after:?} deadline")]
    ToolTimeout { tool: String, after: Duration },

    #[error("compliance violation: {0}")]
    Compliance(String),

    #[error(transparent)]
    Authentication(#[from] SigningError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error("{service} is unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("{service} is degraded: {reason}")]
    Degraded { service: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BreakerError<TransportError>> for RawFailure {
    fn from(err: BreakerError<TransportError>) -> Self {
        match err {
            BreakerError::Open {
                service,
                retry_after,
            } => RawFailure::BreakerOpen {
                service,
                retry_after,
            },
            BreakerError::Timeout { service, after } => RawFailure::Timeout {
                operation: format!("call to {service}"),
                after,
            },
            BreakerError::Inner(e) => RawFailure::Transport(e),
        }
    }
}

impl From<ConfigError> for RawFailure {
    fn from(err: ConfigError) -> Self {
        RawFailure::Configuration(err.to_string())
    }
}

/// Where a failure was observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub trace_id: Option<String>,
    pub tenant_id: Option<String>,
    /// Downstream service involved, if any
    pub service: Option<String>,
}

impl ErrorContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            ..Self::default()
        }
    }

    /// Take trace and tenant from call headers.
    #[must_use]
    pub fn for_call(mut self, headers: &Headers) -> Self {
        self.trace_id = Some(headers.trace_id.clone());
        self.tenant_id = Some(headers.tenant_id.clone());
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    fn frame(&self) -> String {
        format!("{}::{}", self.component, self.operation)
    }
}

/// The one code a raw failure maps to.
pub fn classify(failure: &RawFailure) -> UnifiedErrorCode {
    match failure {
        RawFailure::Timeout { .. } => UnifiedErrorCode::CommunicationTimeout,
        RawFailure::Transport(_) => UnifiedErrorCode::CommunicationFailure,
        RawFailure::BreakerOpen { .. } => UnifiedErrorCode::CircuitBreakerOpen,
        RawFailure::Validation(_) => UnifiedErrorCode::DataValidationFailed,
        RawFailure::ToolExecution { .. } => UnifiedErrorCode::ToolExecutionFailed,
        RawFailure::ToolNotFound { .. } => UnifiedErrorCode::ToolNotFound,
        RawFailure::ToolTimeout { .. } => UnifiedErrorCode::ToolTimeout,
        RawFailure::Compliance(_) => UnifiedErrorCode::ComplianceViolation,
        RawFailure::Authentication(_) => UnifiedErrorCode::AuthenticationFailed,
        RawFailure::Isolation(e) if e.is_cross_tenant() => UnifiedErrorCode::CrossTenantViolation,
        RawFailure::Isolation(_) => UnifiedErrorCode::TenantIsolationViolation,
        RawFailure::Unavailable { .. } | RawFailure::Degraded { .. } => {
            UnifiedErrorCode::ServiceUnavailable
        }
        RawFailure::Configuration(_) | RawFailure::Internal(_) => UnifiedErrorCode::SystemError,
    }
}

/// Classifies, records and escalates failures.
pub struct ErrorTranslationLayer {
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    stats: Mutex<BTreeMap<UnifiedErrorCode, u64>>,
    /// service -> alternate endpoint
    fallbacks: DashMap<String, String>,
}

impl ErrorTranslationLayer {
    pub fn new(audit: Arc<dyn AuditSink>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            audit,
            metrics,
            stats: Mutex::new(BTreeMap::new()),
            fallbacks: DashMap::new(),
        }
    }

    /// Translate a raw failure.
    pub fn translate(&self, failure: RawFailure, ctx: &ErrorContext) -> UnifiedError {
        let code = classify(&failure);
        let mut err = UnifiedError::new(code, failure.to_string());

        match &failure {
            RawFailure::BreakerOpen { retry_after, .. } => {
                err = err.with_retry_after(ceil_secs(*retry_after));
            }
            RawFailure::Isolation(e) => {
                err = err
                    .with_detail("attempt_id", e.attempt_id())
                    .with_detail("reason", e.reason());
            }
            RawFailure::ToolNotFound { agent, tool } => {
                err = err
                    .with_detail("agent", agent.as_str())
                    .with_detail("tool", tool.as_str());
            }
            RawFailure::ToolTimeout { tool, after } => {
                err = err
                    .with_detail("tool", tool.as_str())
                    .with_detail("timeout_ms", after.as_millis() as u64);
            }
            RawFailure::ToolExecution { tool, .. } => {
                err = err.with_detail("tool", tool.as_str());
            }
            RawFailure::Unavailable { service, .. } | RawFailure::Degraded { service, .. } => {
                err = err.with_detail("service", service.as_str());
            }
            _ => {}
        }

        self.track(err, ctx)
    }

    /// Record an error that is already unified (e.g. returned by a handler),
    /// filling in trace, tenant and context from `ctx`.
    pub fn track(&self, mut err: UnifiedError, ctx: &ErrorContext) -> UnifiedError {
        if err.trace_id.is_none() {
            err.trace_id = ctx.trace_id.clone();
        }
        if err.tenant_id.is_none() {
            err.tenant_id = ctx.tenant_id.clone();
        }
        if let Some(service) = &ctx.service {
            if !err.details.contains_key("service") {
                err = err.with_detail("service", service.as_str());
            }
        }
        err = err.with_context(ctx.frame());
        self.record(&err, ctx);
        err
    }

    /// Translate a JSON-RPC style MCP error.
    pub fn translate_mcp_error(
        &self,
        code: i64,
        message: &str,
        data: Option<Value>,
        ctx: &ErrorContext,
    ) -> UnifiedError {
        let unified = match code {
            -32700 | -32600 | -32602 => UnifiedErrorCode::DataValidationFailed,
            -32601 | -32002 => UnifiedErrorCode::ToolNotFound,
            -32001 => UnifiedErrorCode::CommunicationTimeout,
            -32000 => UnifiedErrorCode::CommunicationFailure,
            _ => UnifiedErrorCode::ToolExecutionFailed,
        };

        let mut err = UnifiedError::new(unified, message).with_detail("mcp_code", code);
        if let Some(data) = data {
            err = err.with_detail("data", data);
        }
        self.track(err, ctx)
    }

    /// Translate a failed A2A task state.
    pub fn translate_a2a_failure(&self, state: &str, message: &str, ctx: &ErrorContext) -> UnifiedError {
        let unified = match state {
            "failed" => UnifiedErrorCode::ToolExecutionFailed,
            "rejected" => UnifiedErrorCode::TenantIsolationViolation,
            "auth-required" => UnifiedErrorCode::AuthenticationFailed,
            "canceled" => UnifiedErrorCode::CommunicationFailure,
            "input-required" => UnifiedErrorCode::DataValidationFailed,
            _ => UnifiedErrorCode::SystemError,
        };

        let err = UnifiedError::new(unified, message).with_detail("a2a_state", state);
        self.track(err, ctx)
    }

    /// Decide whether `err` may be retried, waiting out its `retry_after`
    /// first when it names one.
    ///
    /// Unavailable services are only retried through a registered fallback.
    pub async fn attempt_recovery(&self, err: &UnifiedError) -> bool {
        if !err.recoverable {
            debug!(code = %err.code, "Not attempting recovery for non-recoverable error");
            return false;
        }

        match err.code {
            UnifiedErrorCode::CommunicationTimeout
            | UnifiedErrorCode::CommunicationFailure
            | UnifiedErrorCode::CircuitBreakerOpen
            | UnifiedErrorCode::ToolTimeout => {
                let wait = Duration::from_secs(err.retry_after.unwrap_or(0));
                info!(code = %err.code, wait_secs = wait.as_secs(), "Waiting before retry");
                tokio::time::sleep(wait).await;
                true
            }
            UnifiedErrorCode::ServiceUnavailable => {
                let fallback = err
                    .details
                    .get("service")
                    .and_then(Value::as_str)
                    .and_then(|service| self.fallback_for(service));
                match fallback {
                    Some(alternate) => {
                        info!(code = %err.code, alternate = %alternate, "Fallback available");
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Register `alternate` as the endpoint to try when `service` is unavailable.
    pub fn register_fallback(&self, service: impl Into<String>, alternate: impl Into<String>) {
        self.fallbacks.insert(service.into(), alternate.into());
    }

    pub fn fallback_for(&self, service: &str) -> Option<String> {
        self.fallbacks.get(service).map(|a| a.clone())
    }

    /// Errors translated so far, by code.
    pub fn error_stats(&self) -> BTreeMap<UnifiedErrorCode, u64> {
        self.stats.lock().clone()
    }

    fn record(&self, err: &UnifiedError, ctx: &ErrorContext) {
        *self.stats.lock().entry(err.code).or_insert(0) += 1;
        self.metrics.emit_metric(
            names::ERROR,
            1.0,
            MetricUnit::Count,
            &[("code", err.code.as_str()), ("component", ctx.component.as_str())],
            err.tenant_id.as_deref(),
        );

        if err.code.requires_escalation() {
            error!(
                code = %err.code,
                severity = %err.severity(),
                component = %ctx.component,
                trace_id = err.trace_id.as_deref().unwrap_or(""),
                tenant_id = err.tenant_id.as_deref().unwrap_or(""),
                "{}",
                err.message
            );
            let event = AuditEvent::new(err.severity(), err.code.as_str(), err.message.clone())
                .with_trace(err.trace_id.clone(), err.tenant_id.clone())
                .with_details(Value::Object(err.details.clone()));
            self.audit.append_audit_event(event);
        } else {
            warn!(
                code = %err.code,
                component = %ctx.component,
                trace_id = err.trace_id.as_deref().unwrap_or(""),
                "{}",
                err.message
            );
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
