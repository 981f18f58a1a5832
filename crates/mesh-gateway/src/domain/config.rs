//! Gateway configuration with validation.
//!
//! Loaded from TOML. Every section has defaults, so an empty file is a valid
//! configuration with an empty policy table.
//!
//! ```toml
//! [security]
//! max_signature_age = "300s"
//! default_algorithm = "Ed25519"
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! recovery_timeout = "60s"
//!
//! [[policy.tenants]]
//! tenant_id = "tenant-x"
//! isolation_level = "strict"
//! ```

use crate::middleware::circuit_breaker::CircuitBreakerConfig;
use mesh_security::{KeyAlgorithm, SigningPolicy, DEFAULT_LOG_CAPACITY};
use mesh_types::PolicyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Signing and verification
    pub security: SecurityConfig,
    /// Circuit breaker configuration for downstream resilience
    pub circuit_breaker: CircuitBreakerConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Access log retention
    pub audit: AuditConfig,
    /// Retry helper defaults
    pub retry: RetryConfig,
    /// Tenant and agent policy tables
    pub policy: PolicyConfig,
}

impl GatewayConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate breaker thresholds
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "failure_threshold cannot be 0".into(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "success_threshold cannot be 0".into(),
            ));
        }

        // Validate timeouts
        let timeouts = [
            ("circuit_breaker.recovery_timeout", self.circuit_breaker.recovery_timeout),
            ("circuit_breaker.call_timeout", self.circuit_breaker.call_timeout),
            ("timeouts.default_call", self.timeouts.default_call),
            ("timeouts.tool_execution", self.timeouts.tool_execution),
            ("timeouts.callback_wait", self.timeouts.callback_wait),
            ("timeouts.pending_cleanup_interval", self.timeouts.pending_cleanup_interval),
            ("security.max_signature_age", self.security.max_signature_age),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::InvalidTimeout(format!("{name} cannot be 0")));
            }
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::InvalidTimeout(
                "retry.base_delay exceeds retry.max_delay".into(),
            ));
        }

        // Validate limits
        if self.audit.access_log_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "access_log_capacity cannot be 0".into(),
            ));
        }

        self.security.signing_policy()?;
        validate_policy(&self.policy)
    }
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    let mut tenants = HashSet::new();
    for tenant in &policy.tenants {
        if tenant.tenant_id.is_empty() {
            return Err(ConfigError::Invalid("tenant_id cannot be empty".into()));
        }
        if !tenants.insert(tenant.tenant_id.as_str()) {
            return Err(ConfigError::DuplicateEntry(format!(
                "tenant {}",
                tenant.tenant_id
            )));
        }
    }

    let mut agents = HashSet::new();
    for agent in &policy.agents {
        if agent.agent_id.is_empty() {
            return Err(ConfigError::Invalid("agent_id cannot be empty".into()));
        }
        if !agents.insert(agent.agent_id.as_str()) {
            return Err(ConfigError::DuplicateEntry(format!("agent {}", agent.agent_id)));
        }
    }
    Ok(())
}

/// Signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum age of an accepted signature
    #[serde(with = "humantime_serde")]
    pub max_signature_age: Duration,
    /// How far a signature may be dated ahead of the verifier's clock
    #[serde(with = "humantime_serde")]
    pub max_future_skew: Duration,
    /// Algorithm used for outbound signatures
    pub default_algorithm: KeyAlgorithm,
    /// Lifetime of keys issued by rotation (None = no expiry)
    #[serde(with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub key_ttl: Option<Duration>,
    /// How long superseded keys keep verifying after rotation
    #[serde(with = "humantime_serde")]
    pub rotation_grace: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_signature_age: Duration::from_secs(300),
            max_future_skew: Duration::from_secs(10),
            default_algorithm: KeyAlgorithm::HmacSha256,
            key_ttl: None,
            rotation_grace: Duration::ZERO,
        }
    }
}

impl SecurityConfig {
    /// Timing rules for the signing service.
    pub fn signing_policy(&self) -> Result<SigningPolicy, ConfigError> {
        let convert = |name: &str, value: Duration| {
            chrono::Duration::from_std(value)
                .map_err(|_| ConfigError::InvalidTimeout(format!("security.{name} out of range")))
        };
        Ok(SigningPolicy {
            max_age: convert("max_signature_age", self.max_signature_age)?,
            max_future_skew: convert("max_future_skew", self.max_future_skew)?,
            rotation_grace: convert("rotation_grace", self.rotation_grace)?,
            key_ttl: self
                .key_ttl
                .map(|ttl| convert("key_ttl", ttl))
                .transpose()?,
        })
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default deadline for an outbound send
    #[serde(with = "humantime_serde")]
    pub default_call: Duration,
    /// Deadline for a dispatched tool handler
    #[serde(with = "humantime_serde")]
    pub tool_execution: Duration,
    /// How long `call_tool_and_wait` waits for the callback
    #[serde(with = "humantime_serde")]
    pub callback_wait: Duration,
    /// Interval of the pending-result cleanup task
    #[serde(with = "humantime_serde")]
    pub pending_cleanup_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_call: Duration::from_secs(30),
            tool_execution: Duration::from_secs(60),
            callback_wait: Duration::from_secs(120),
            pending_cleanup_interval: Duration::from_secs(10),
        }
    }
}

/// Access log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Records kept before the oldest are evicted
    pub access_log_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            access_log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Defaults for `exponential_backoff_retry`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid breaker threshold
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// A tenant or agent appears twice in the policy
    #[error("duplicate policy entry: {0}")]
    DuplicateEntry(String),
    /// The file could not be read
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },
    /// The document is not valid TOML for this schema
    #[error("cannot parse configuration: {0}")]
    Parse(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Duration (de)serialization as `"30s"`, `"250ms"` or `"5m"`.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn format_duration(duration: Duration) -> String {
        if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.trim().parse::<u64>().map_err(|_| "invalid minutes")?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or("duration out of range")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&super::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
