//! Fixed-window request counting per (credential, endpoint).
//!
//! Each guarded endpoint owns a map of request counts keyed by
//! (credential, window index), where `window index = floor(unix_now /
//! window_seconds)`. A new index implicitly starts a fresh window; the
//! boundary is a hard cutoff, so a burst of up to 2x the budget can straddle
//! a boundary. That is a deliberate simplification over sliding-window or
//! token-bucket accounting, traded for O(1) checks and no per-request
//! timestamps.
//!
//! Counters are in-memory only. A process restart resets every budget.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::proxy::credentials::{credential_prefix, extract_bearer_credential};
use crate::proxy::prometheus;

/// Stale buckets are swept at most this often per endpoint, amortizing the
/// cleanup cost instead of paying it on every request.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(120);

/// Outcome of a window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request counted; `remaining` budget left in the current window.
    Allowed { remaining: u32 },
    /// Budget exhausted; retry once the window rolls over.
    Limited { retry_after: u64 },
}

/// Fixed-window counter set for one endpoint name.
///
/// Guards created with the same endpoint name share one instance (see
/// [`RateLimitRegistry`]), which lets several routes draw on a single
/// budget.
pub struct FixedWindowLimiter {
    endpoint: String,
    max_requests: u32,
    window_seconds: u64,
    buckets: DashMap<(String, u64), u32>,
    last_cleanup: Mutex<Instant>,
}

impl FixedWindowLimiter {
    pub fn new(endpoint: impl Into<String>, max_requests: u32, window_seconds: u64) -> Self {
        let endpoint = endpoint.into();
        debug_assert!(max_requests > 0, "max_requests must be positive");
        debug_assert!(window_seconds > 0, "window_seconds must be positive");

        Self {
            endpoint,
            max_requests: max_requests.max(1),
            window_seconds: window_seconds.max(1),
            buckets: DashMap::new(),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Machine-readable tag distinguishing this endpoint's rejections from
    /// other 429 sources.
    pub fn reason_tag(&self) -> String {
        format!("endpoint_{}_limit", self.endpoint)
    }

    /// Check and count a request for `credential` against the wall clock.
    pub fn check(&self, credential: &str) -> RateLimitDecision {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.check_at(credential, now)
    }

    /// Window math with an explicit clock, so tests drive time directly.
    ///
    /// A request landing exactly on the window epoch belongs to the new
    /// window.
    pub fn check_at(&self, credential: &str, now: u64) -> RateLimitDecision {
        self.maybe_cleanup(now);

        let bucket_id = now / self.window_seconds;
        let mut count = self.buckets.entry((credential.to_string(), bucket_id)).or_insert(0);

        if *count >= self.max_requests {
            let retry_after = (bucket_id + 1) * self.window_seconds - now;
            return RateLimitDecision::Limited { retry_after };
        }

        *count += 1;
        RateLimitDecision::Allowed { remaining: self.max_requests - *count }
    }

    /// Amortized sweep. Between sweeps, stale buckets accumulate harmlessly;
    /// they are never consulted once their window has passed.
    fn maybe_cleanup(&self, now: u64) {
        {
            let mut last = self.last_cleanup.lock();
            if last.elapsed() < CLEANUP_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        self.sweep_stale(now);
    }

    /// Remove every bucket whose window index is behind the current one.
    fn sweep_stale(&self, now: u64) -> usize {
        let current_bucket = now / self.window_seconds;
        let before = self.buckets.len();
        self.buckets.retain(|(_, bucket_id), _| *bucket_id >= current_bucket);
        let removed = before.saturating_sub(self.buckets.len());

        if removed > 0 {
            tracing::debug!(endpoint = %self.endpoint, removed, "swept stale rate-limit buckets");
        }
        removed
    }

    /// Build the structured 429 for an exhausted window budget.
    fn rejection_response(&self, retry_after: u64) -> Response {
        let body = serde_json::json!({
            "error": {
                "message": format!(
                    "Rate limit exceeded for this endpoint. Maximum {} requests per {} seconds.",
                    self.max_requests, self.window_seconds
                ),
                "type": "endpoint_rate_limit",
                "code": 429
            }
        })
        .to_string();

        Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::RETRY_AFTER, retry_after)
            .header("RateLimit-Limit", self.max_requests)
            .header("RateLimit-Remaining", 0)
            .header("RateLimit-Reset", retry_after)
            .header("X-RateLimit-Limit", self.max_requests)
            .header("X-RateLimit-Remaining", 0)
            .header("X-RateLimit-Reason", self.reason_tag())
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }
}

/// Registry of per-endpoint limiters.
///
/// `limiter()` is the guard factory: the first call for an endpoint name
/// creates its counter set, later calls return the shared instance
/// regardless of the parameters they pass.
#[derive(Default)]
pub struct RateLimitRegistry {
    limiters: DashMap<String, Arc<FixedWindowLimiter>>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        Self { limiters: DashMap::new() }
    }

    pub fn limiter(
        &self,
        endpoint: &str,
        max_requests: u32,
        window_seconds: u64,
    ) -> Arc<FixedWindowLimiter> {
        self.limiters
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(FixedWindowLimiter::new(endpoint, max_requests, window_seconds))
            })
            .clone()
    }
}

/// Route-level guard. Attach to a route with
/// `axum::middleware::from_fn_with_state(limiter, endpoint_rate_limit_middleware)`.
pub async fn endpoint_rate_limit_middleware(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    // Endpoint budgets never block anonymous traffic; that is the
    // concurrency gate's and the external anonymous limiter's job.
    let credential = match extract_bearer_credential(request.headers()) {
        Some(c) => c.to_string(),
        None => return next.run(request).await,
    };

    match limiter.check(&credential) {
        RateLimitDecision::Allowed { .. } => next.run(request).await,
        RateLimitDecision::Limited { retry_after } => {
            prometheus::record_endpoint_rejection(limiter.endpoint());
            tracing::debug!(
                key_prefix = credential_prefix(&credential),
                endpoint = limiter.endpoint(),
                retry_after,
                "endpoint window budget exhausted"
            );
            limiter.rejection_response(retry_after)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-test-key-window-01";

    #[test]
    fn test_allows_up_to_max_in_window() {
        let limiter = FixedWindowLimiter::new("user_balance", 60, 60);

        for i in 0..60 {
            let decision = limiter.check_at(KEY, 10);
            assert_eq!(
                decision,
                RateLimitDecision::Allowed { remaining: 59 - i },
                "request {i} should be allowed"
            );
        }

        // The 61st request in the same window is rejected
        assert!(matches!(limiter.check_at(KEY, 10), RateLimitDecision::Limited { .. }));
    }

    #[test]
    fn test_window_boundary_is_hard_cutoff() {
        let limiter = FixedWindowLimiter::new("test", 2, 60);

        assert!(matches!(limiter.check_at(KEY, 0), RateLimitDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at(KEY, 0), RateLimitDecision::Allowed { .. }));

        // Third request at t=0: rejected, window resets at t=60
        let decision = limiter.check_at(KEY, 0);
        assert_eq!(decision, RateLimitDecision::Limited { retry_after: 60 });

        // A new window starts at t=61 (and would have at exactly t=60)
        assert!(matches!(limiter.check_at(KEY, 61), RateLimitDecision::Allowed { .. }));
    }

    #[test]
    fn test_request_at_exact_epoch_is_in_new_window() {
        let limiter = FixedWindowLimiter::new("test", 1, 60);

        assert!(matches!(limiter.check_at(KEY, 59), RateLimitDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at(KEY, 59), RateLimitDecision::Limited { .. }));
        assert!(matches!(limiter.check_at(KEY, 60), RateLimitDecision::Allowed { .. }));
    }

    #[test]
    fn test_retry_after_counts_down_within_window() {
        let limiter = FixedWindowLimiter::new("test", 1, 60);

        assert!(matches!(limiter.check_at(KEY, 0), RateLimitDecision::Allowed { .. }));
        assert_eq!(limiter.check_at(KEY, 15), RateLimitDecision::Limited { retry_after: 45 });
        assert_eq!(limiter.check_at(KEY, 59), RateLimitDecision::Limited { retry_after: 1 });
    }

    #[test]
    fn test_credentials_are_independent() {
        let limiter = FixedWindowLimiter::new("test", 1, 60);

        assert!(matches!(limiter.check_at("sk-test-key-aaaaaaaa", 0), RateLimitDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at("sk-test-key-aaaaaaaa", 0), RateLimitDecision::Limited { .. }));
        assert!(matches!(limiter.check_at("sk-test-key-bbbbbbbb", 0), RateLimitDecision::Allowed { .. }));
    }

    #[test]
    fn test_sweep_removes_only_stale_buckets() {
        let limiter = FixedWindowLimiter::new("test", 5, 60);

        limiter.check_at(KEY, 10); // bucket 0
        limiter.check_at(KEY, 70); // bucket 1
        limiter.check_at("sk-test-key-other-02", 10); // bucket 0
        assert_eq!(limiter.buckets.len(), 3);

        let removed = limiter.sweep_stale(70);
        assert_eq!(removed, 2);
        assert_eq!(limiter.buckets.len(), 1);

        // The current window's count survives the sweep
        assert!(limiter.buckets.contains_key(&(KEY.to_string(), 1)));
    }

    #[test]
    fn test_registry_shares_state_per_name() {
        let registry = RateLimitRegistry::new();

        let a = registry.limiter("user_balance", 1, 60);
        let b = registry.limiter("user_balance", 99, 99);
        let other = registry.limiter("images_generations", 1, 60);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));

        // Shared state: a request counted through one guard consumes the
        // budget seen by the other
        assert!(matches!(a.check_at(KEY, 0), RateLimitDecision::Allowed { .. }));
        assert!(matches!(b.check_at(KEY, 0), RateLimitDecision::Limited { .. }));
    }
}
