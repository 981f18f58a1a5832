//! Gateway domain: configuration and call correlation.

pub mod config;
pub mod pending;

pub use config::{
    AuditConfig, ConfigError, GatewayConfig, RetryConfig, SecurityConfig, TimeoutConfig,
};
pub use pending::{cleanup_task, CompletedCall, PendingResults, PendingStats};
