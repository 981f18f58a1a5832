//! # Mesh Security
//!
//! Authentication and authorization for agent-to-agent calls.
//!
//! ## Components
//!
//! | Component                 | Responsibility                                   |
//! |---------------------------|--------------------------------------------------|
//! | `SigningService`          | Per-agent keys, header signatures, rotation      |
//! | `AuthenticationService`   | Outbound signing and replay-checked verification |
//! | `TenantIsolationEngine`   | Tenant and agent policy decisions                |
//! | `AccessLog`               | Bounded record of every decision                 |
//!
//! ## Security Flow
//!
//! ```text
//! inbound call -> validate_inbound (signature, age, caller binding, nonce)
//!              -> validate_access (tenant and agent policy)
//!              -> dispatch
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod audit;
pub mod auth;
pub mod clock;
pub mod errors;
pub mod isolation;
pub mod keys;
pub mod signing;

pub use audit::{AccessAttempt, AccessFilter, AccessLog, TenantStats, DEFAULT_LOG_CAPACITY};
pub use auth::AuthenticationService;
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{IsolationError, SigningError};
pub use isolation::{AccessGrant, TenantIsolationEngine};
pub use keys::{KeyAlgorithm, KeyInfo, SigningKey};
pub use signing::{SigningPolicy, SigningService, VerifiedSignature};
