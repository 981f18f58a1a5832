//! # Unified Error Taxonomy
//!
//! The single error shape that crosses component boundaries. Every raw
//! failure (transport, breaker, signature, policy, tool) is translated into
//! exactly one [`UnifiedErrorCode`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Closed set of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedErrorCode {
    /// The call did not complete within its deadline.
    CommunicationTimeout,
    /// The message could not be delivered.
    CommunicationFailure,
    /// The target is not reachable or is degraded.
    ServiceUnavailable,
    /// The target's circuit breaker is open.
    CircuitBreakerOpen,
    /// Signature missing, malformed, expired or forged.
    AuthenticationFailed,
    /// Tenant isolation policy denied the call.
    TenantIsolationViolation,
    /// The caller is not permitted in the requested tenant.
    CrossTenantViolation,
    /// Arguments or payload failed validation.
    DataValidationFailed,
    /// The tool handler failed.
    ToolExecutionFailed,
    /// No such tool on the target agent.
    ToolNotFound,
    /// The tool handler exceeded its execution deadline.
    ToolTimeout,
    /// A business compliance rule rejected the call.
    ComplianceViolation,
    /// Configuration or internal error.
    SystemError,
}

/// Escalation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl UnifiedErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [UnifiedErrorCode; 13] = [
        UnifiedErrorCode::CommunicationTimeout,
        UnifiedErrorCode::CommunicationFailure,
        UnifiedErrorCode::ServiceUnavailable,
        UnifiedErrorCode::CircuitBreakerOpen,
        UnifiedErrorCode::AuthenticationFailed,
        UnifiedErrorCode::TenantIsolationViolation,
        UnifiedErrorCode::CrossTenantViolation,
        UnifiedErrorCode::DataValidationFailed,
        UnifiedErrorCode::ToolExecutionFailed,
        UnifiedErrorCode::ToolNotFound,
        UnifiedErrorCode::ToolTimeout,
        UnifiedErrorCode::ComplianceViolation,
        UnifiedErrorCode::SystemError,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UnifiedErrorCode::CommunicationTimeout => "communication_timeout",
            UnifiedErrorCode::CommunicationFailure => "communication_failure",
            UnifiedErrorCode::ServiceUnavailable => "service_unavailable",
            UnifiedErrorCode::CircuitBreakerOpen => "circuit_breaker_open",
            UnifiedErrorCode::AuthenticationFailed => "authentication_failed",
            UnifiedErrorCode::TenantIsolationViolation => "tenant_isolation_violation",
            UnifiedErrorCode::CrossTenantViolation => "cross_tenant_violation",
            UnifiedErrorCode::DataValidationFailed => "data_validation_failed",
            UnifiedErrorCode::ToolExecutionFailed => "tool_execution_failed",
            UnifiedErrorCode::ToolNotFound => "tool_not_found",
            UnifiedErrorCode::ToolTimeout => "tool_timeout",
            UnifiedErrorCode::ComplianceViolation => "compliance_violation",
            UnifiedErrorCode::SystemError => "system_error",
        }
    }

    /// Whether a caller may retry after `retry_after`.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            UnifiedErrorCode::CommunicationTimeout
                | UnifiedErrorCode::CommunicationFailure
                | UnifiedErrorCode::ServiceUnavailable
                | UnifiedErrorCode::CircuitBreakerOpen
                | UnifiedErrorCode::ToolTimeout
        )
    }

    /// Default retry hint in seconds for recoverable codes.
    #[must_use]
    pub fn default_retry_after(&self) -> Option<u64> {
        match self {
            UnifiedErrorCode::CommunicationTimeout => Some(5),
            UnifiedErrorCode::CommunicationFailure => Some(10),
            UnifiedErrorCode::ServiceUnavailable => Some(30),
            UnifiedErrorCode::CircuitBreakerOpen => Some(60),
            UnifiedErrorCode::ToolTimeout => Some(10),
            _ => None,
        }
    }

    /// Escalation severity.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            UnifiedErrorCode::CrossTenantViolation | UnifiedErrorCode::ComplianceViolation => {
                Severity::Critical
            }
            UnifiedErrorCode::AuthenticationFailed
            | UnifiedErrorCode::TenantIsolationViolation
            | UnifiedErrorCode::SystemError => Severity::High,
            UnifiedErrorCode::DataValidationFailed
            | UnifiedErrorCode::ToolExecutionFailed
            | UnifiedErrorCode::CircuitBreakerOpen
            | UnifiedErrorCode::ServiceUnavailable => Severity::Medium,
            UnifiedErrorCode::CommunicationTimeout
            | UnifiedErrorCode::CommunicationFailure
            | UnifiedErrorCode::ToolNotFound
            | UnifiedErrorCode::ToolTimeout => Severity::Low,
        }
    }

    /// Whether errors with this code go to the audit sink.
    #[must_use]
    pub fn requires_escalation(&self) -> bool {
        self.severity() >= Severity::High
    }
}

impl fmt::Display for UnifiedErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The error every mesh component returns across its boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct UnifiedError {
    /// Error code.
    pub code: UnifiedErrorCode,
    /// Human readable message.
    pub message: String,
    /// Structured details (service name, tool name, underlying error ...).
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Trace of the call that failed.
    pub trace_id: Option<String>,
    /// Tenant of the call that failed.
    pub tenant_id: Option<String>,
    /// Whether the caller may retry.
    pub recoverable: bool,
    /// Seconds to wait before retrying. Always set for recoverable errors.
    pub retry_after: Option<u64>,
    /// Component frames the error passed through, innermost first.
    #[serde(default)]
    pub context: Vec<String>,
    /// When the error was created.
    pub timestamp: DateTime<Utc>,
}

impl UnifiedError {
    /// Create an error; recoverability and retry hint come from the code.
    pub fn new(code: UnifiedErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Map::new(),
            trace_id: None,
            tenant_id: None,
            recoverable: code.is_recoverable(),
            retry_after: code.default_retry_after(),
            context: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a detail value.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach trace and tenant identifiers.
    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Override the retry hint. Ignored for non-recoverable errors.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        if self.recoverable {
            self.retry_after = Some(seconds);
        }
        self
    }

    /// Record a component frame.
    #[must_use]
    pub fn with_context(mut self, frame: impl Into<String>) -> Self {
        self.context.push(frame.into());
        self
    }

    /// Severity of this error's code.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

/// Result alias for mesh operations.
pub type MeshResult<T> = Result<T, UnifiedError>;
