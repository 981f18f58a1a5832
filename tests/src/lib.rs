//! # Agent-Mesh Test Suite
//!
//! Unified test crate for flows that cross crate boundaries.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── mesh_benchmarks.rs   # sign/verify and access-decision throughput
//! └── src/
//!     ├── fixtures.rs          # shared two-tenant mesh
//!     └── integration/
//!         ├── signing_flows.rs     # round-trip, replay window, rotation
//!         ├── isolation_flows.rs   # policy decisions and audit completeness
//!         ├── breaker_flows.rs     # breaker lifecycle behind the gateway
//!         └── gateway_flows.rs     # call / ack / callback choreography
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mesh-tests
//!
//! # By category
//! cargo test -p mesh-tests integration::gateway_flows::
//!
//! # Benchmarks
//! cargo bench -p mesh-tests
//! ```

#![allow(dead_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod fixtures;
pub mod integration;
