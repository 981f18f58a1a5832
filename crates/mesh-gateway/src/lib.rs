//! Mesh Gateway - authenticated, tenant-isolated tool calls between agents.
//!
//! One [`Gateway`] runs per agent. It owns the agent's outbound circuit
//! breakers, its local tool registry and the table of calls waiting for a
//! callback. Signing keys, isolation policy and the bus are shared through
//! [`MeshServices`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        GATEWAY (one per agent)                   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Outbound                         Inbound                        │
//! │  ┌────────────────────┐           ┌──────────────────────────┐   │
//! │  │ sign (auth)        │           │ validate_inbound (replay) │   │
//! │  │ breaker per target │           │ validate_access (policy)  │   │
//! │  │ pending callbacks  │           │ schema check + dispatch   │   │
//! │  └─────────┬──────────┘           └────────────┬─────────────┘   │
//! │            │       ErrorTranslationLayer       │                 │
//! │            │  (classify, audit, escalate)      │                 │
//! └────────────┼───────────────────────────────────┼─────────────────┘
//!              ▼                                   │
//!          Transport (mesh-bus) ───────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mesh_gateway::{Gateway, GatewayConfig, MeshServices};
//!
//! let config = GatewayConfig::load("mesh.toml")?;
//! let services = MeshServices::from_config(&config, Arc::new(InMemoryTransport::new()))?;
//! let erp = Arc::new(Gateway::new("erp", config, services));
//! erp.provision_key("tenant-x");
//! erp.spawn_serve()?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod domain;
pub mod middleware;
pub mod retry;
pub mod service;
pub mod tools;
pub mod translation;

// Re-exports for public API
pub use domain::config::{ConfigError, GatewayConfig};
pub use domain::pending::{CompletedCall, PendingResults};
pub use middleware::{
    BreakerError, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitState,
};
pub use retry::{exponential_backoff_retry, retry_with};
pub use service::{Gateway, InboundResponse, MeshServices, CALLBACK_SCHEME};
pub use tools::{tool_fn, ToolDirectory, ToolError, ToolHandler, ToolRegistry};
pub use translation::{classify, ErrorContext, ErrorTranslationLayer, RawFailure};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
