//! # Gatewayz Core
//!
//! Core gateway logic for Gatewayz: in-process admission control in front of
//! LLM inference endpoints.
//!
//! ## Architecture
//!
//! ```text
//! gatewayz-core/src/proxy/
//! ├── middleware/       # Transport-layer gate (per-key concurrency)
//! ├── rate_limit/       # Route-layer fixed-window limiter
//! ├── credentials.rs    # Bearer-token extraction shared by both
//! ├── upstream.rs       # Byte-transparent forwarder
//! ├── server.rs         # Axum router + server assembly
//! └── prometheus.rs     # Metrics endpoint
//! ```
//!
//! Both admission components are in-memory and best-effort: a process
//! restart resets all slot pools and window counters.

#![allow(
    clippy::significant_drop_tightening,
    reason = "Lock guards in async code require careful lifetime management"
)]
// Test-only lints: allow panic!, unwrap, etc. in test code
#![cfg_attr(
    test,
    allow(clippy::panic, clippy::unwrap_used, clippy::assertions_on_result_states)
)]

pub mod error;
pub mod proxy;

// Re-export commonly used types
pub use error::{AppError, AppResult};
