//! # Mesh Bus - Transport for Agent-to-Agent Calls
//!
//! Point-to-point delivery of [`BusMessage`](mesh_types::BusMessage)s between
//! agent endpoints. The bus carries no policy: signing, isolation and
//! resilience are layered on top by `mesh-security` and `mesh-gateway`.
//!
//! ```text
//! ┌──────────────┐   send(endpoint, msg)   ┌──────────────┐
//! │   Agent A    │ ──────────┐             │   Agent B    │
//! └──────────────┘           ▼             └──────────────┘
//!                      ┌──────────────┐           ↑
//!                      │  Transport   │ ──────────┘
//!                      │ (mailboxes)  │   Mailbox::recv()
//!                      └──────────────┘
//! ```
//!
//! ## Security
//!
//! - **Time-Bounded Nonce Cache:** rejects exact replays of a signature
//!   within its validity window.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod memory;
pub mod nonce_cache;
pub mod transport;

pub use memory::InMemoryTransport;
pub use nonce_cache::{NonceCache, NonceError};
pub use transport::{Mailbox, Transport, TransportError};

/// Maximum messages buffered per mailbox before senders wait.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1000;
