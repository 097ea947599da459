// Middleware module - Axum middleware

pub mod concurrency;
pub mod cors;

pub use concurrency::{concurrency_gate_middleware, ConcurrencyGate, SlotGuard};
pub use cors::cors_layer;
