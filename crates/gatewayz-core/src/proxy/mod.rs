//! Proxy module - admission control in front of the inference endpoints.
//!
//! Control flow for an inbound request:
//!
//! ```text
//! request → concurrency gate (transport layer)
//!         → route dispatch
//!         → fixed-window guard (route layer)
//!         → upstream forwarder
//! ```
//!
//! The two admission components are independent leaves; they are composed by
//! the router in `server.rs`, never by each other.

pub mod config;
pub mod credentials;
pub mod handlers;
pub mod middleware;
pub mod prometheus;
pub mod rate_limit;
pub mod server;
pub mod upstream;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{
    load_config, ConcurrencyGateConfig, EndpointLimitConfig, GatewayConfig, ServerConfig,
    UpstreamConfig,
};
pub use middleware::{concurrency_gate_middleware, ConcurrencyGate, SlotGuard};
pub use rate_limit::{
    endpoint_rate_limit_middleware, FixedWindowLimiter, RateLimitDecision, RateLimitRegistry,
};
pub use server::{build_proxy_router, AppState, AxumServer};
pub use upstream::UpstreamClient;
