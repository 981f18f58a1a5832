//! Error types for signing and isolation.

use thiserror::Error;

/// Reasons a signature could not be produced or was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("No active signing key for agent {0}")]
    NoActiveKey(String),

    #[error("Agent {0} has no signing keys")]
    UnknownAgent(String),

    #[error("Headers carry no signature")]
    MissingSignature,

    #[error("Malformed signature: {0}")]
    Malformed(String),

    #[error("Unknown signing key {0}")]
    UnknownKey(String),

    #[error("Signing key {0} has expired")]
    KeyExpired(String),

    #[error("Signature is older than the allowed age")]
    SignatureExpired,

    #[error("Signature timestamp is too far in the future")]
    TimestampInFuture,

    #[error("Header timestamp does not match the signed timestamp")]
    TimestampMismatch,

    #[error("Caller {caller} does not own key {key_id}")]
    CallerMismatch { caller: String, key_id: String },

    #[error("Header field {0} contains the reserved '|' separator")]
    ReservedSeparator(&'static str),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Nonce {nonce} for key {key_id} was already used (replay)")]
    ReplayDetected { key_id: String, nonce: String },
}

/// An access decision that went against the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IsolationError {
    /// The caller tried to act in a tenant it does not belong to.
    #[error("Cross-tenant access denied for {caller} in tenant {tenant_id}: {reason}")]
    CrossTenantAccess {
        caller: String,
        tenant_id: String,
        reason: String,
        attempt_id: String,
    },

    /// Any other isolation denial.
    #[error("Tenant isolation denied {caller} -> {target}/{tool} in tenant {tenant_id}: {reason}")]
    TenantIsolation {
        caller: String,
        target: String,
        tool: String,
        tenant_id: String,
        reason: String,
        attempt_id: String,
    },
}

impl IsolationError {
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            IsolationError::CrossTenantAccess { reason, .. }
            | IsolationError::TenantIsolation { reason, .. } => reason,
        }
    }

    /// Identifier of the audit record written for this decision.
    #[must_use]
    pub fn attempt_id(&self) -> &str {
        match self {
            IsolationError::CrossTenantAccess { attempt_id, .. }
            | IsolationError::TenantIsolation { attempt_id, .. } => attempt_id,
        }
    }

    #[must_use]
    pub fn is_cross_tenant(&self) -> bool {
        matches!(self, IsolationError::CrossTenantAccess { .. })
    }
}
