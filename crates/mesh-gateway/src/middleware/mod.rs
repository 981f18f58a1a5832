//! Call-path middleware.

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerError, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitState,
};
