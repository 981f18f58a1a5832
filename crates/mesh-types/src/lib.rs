//! # Mesh Types Crate
//!
//! Types shared by every crate in the agent mesh.
//!
//! ## Design Principles
//!
//! - **Headers are the identity**: `Headers::caller` is the only claim of who
//!   is calling; it is bound to a signing key by `mesh-security`.
//! - **One error shape**: every failure that crosses a component boundary is a
//!   [`UnifiedError`] carrying a code from the closed [`UnifiedErrorCode`] set.
//! - **Structured policy**: tenant and agent policy tables are typed records,
//!   never free-form maps.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod envelope;
pub mod errors;
pub mod headers;
pub mod policy;
pub mod tool;

pub use envelope::{BusMessage, ToolCall, ToolCallback};
pub use errors::{MeshResult, Severity, UnifiedError, UnifiedErrorCode};
pub use headers::{format_timestamp, parse_timestamp, AddressError, Headers, ReplyTo};
pub use policy::{AgentConfig, IsolationLevel, PolicyConfig, TenantConfig, SHARED_TENANT, WILDCARD};
pub use tool::{CallAck, CallOutcome, ToolDescriptor};
