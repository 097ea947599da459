//! Per-endpoint fixed-window rate limiting.

mod fixed_window;

pub use fixed_window::{
    endpoint_rate_limit_middleware, FixedWindowLimiter, RateLimitDecision, RateLimitRegistry,
};
