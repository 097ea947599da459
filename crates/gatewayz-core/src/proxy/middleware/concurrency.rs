//! Per-key concurrency gate.
//!
//! Bounds the number of simultaneously in-flight requests for any single API
//! key on the inference paths, so one heavy caller cannot monopolize shared
//! server capacity. There is no queue: a request that finds its key's pool
//! saturated is rejected with 429 immediately, and retrying is the caller's
//! responsibility.
//!
//! # Architecture
//!
//! 1. **ConcurrencyGate** - injectable service owning the per-key slot pools
//! 2. **SlotGuard** - RAII slot reservation, released on drop
//! 3. **concurrency_gate_middleware** - axum layer applying the gate to the
//!    limited paths
//!
//! Slot accounting is a CAS loop on an atomic counter per key, so admission
//! for an existing pool never waits on other keys. The pool table itself
//! (create/touch/evict) is serialized by one mutex with short, await-free
//! critical sections.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::proxy::config::ConcurrencyGateConfig;
use crate::proxy::credentials::{credential_prefix, extract_bearer_credential};
use crate::proxy::prometheus;

/// Paths subject to per-key concurrency limiting. Requests to any other path
/// pass through untouched.
const LIMITED_PATHS: &[&str] = &[
    "/v1/chat/completions",
    "/v1/messages",
    "/ai-sdk/chat/completions",
    "/v1/images/generations",
];

/// Advisory retry delay reported on concurrency rejections, in seconds.
const RETRY_AFTER_SECS: u64 = 2;

/// One credential's pool of in-flight slots.
struct KeySlots {
    active: AtomicU32,
}

impl KeySlots {
    fn new() -> Self {
        Self { active: AtomicU32::new(0) }
    }

    fn is_idle(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0
    }
}

/// Pool map plus access-recency order, guarded by one mutex.
/// Least-recently-used key at the front of the queue.
struct PoolTable {
    pools: HashMap<Arc<str>, Arc<KeySlots>>,
    recency: VecDeque<Arc<str>>,
}

/// The per-key concurrency gate service.
///
/// Constructed once at startup and shared via axum state; owns all slot-pool
/// state exclusively.
pub struct ConcurrencyGate {
    table: Mutex<PoolTable>,
    max_concurrent_per_key: u32,
    max_tracked_keys: usize,
}

impl ConcurrencyGate {
    pub fn new(config: &ConcurrencyGateConfig) -> Self {
        Self {
            table: Mutex::new(PoolTable { pools: HashMap::new(), recency: VecDeque::new() }),
            max_concurrent_per_key: config.max_concurrent_per_key,
            max_tracked_keys: config.max_tracked_keys,
        }
    }

    /// Whether `path` is subject to the gate.
    pub fn is_limited_path(path: &str) -> bool {
        LIMITED_PATHS.contains(&path)
    }

    /// Try to reserve an in-flight slot for `credential` without waiting.
    ///
    /// Returns `None` when the key's pool is saturated. On success the
    /// returned guard holds the slot until dropped.
    pub fn try_acquire(&self, credential: &str) -> Option<SlotGuard> {
        let slots = self.touch_pool(credential);

        // Atomically reserve a slot if current count < max. The count must
        // never overshoot the limit, so CAS retries on contention.
        loop {
            let current = slots.active.load(Ordering::SeqCst);
            if current >= self.max_concurrent_per_key {
                return None;
            }
            if slots
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let key_prefix = credential_prefix(credential).to_string();
                prometheus::increment_active_requests(&key_prefix);
                return Some(SlotGuard { slots, key_prefix });
            }
        }
    }

    /// Number of slots currently held for `credential`.
    pub fn active_requests(&self, credential: &str) -> u32 {
        let table = self.table.lock();
        table.pools.get(credential).map_or(0, |s| s.active.load(Ordering::SeqCst))
    }

    /// Number of distinct credentials currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.table.lock().pools.len()
    }

    /// Look up or lazily create the slot pool for `credential`, marking it
    /// most-recently-used.
    fn touch_pool(&self, credential: &str) -> Arc<KeySlots> {
        let mut guard = self.table.lock();
        let table = &mut *guard;

        if let Some(slots) = table.pools.get(credential) {
            let slots = Arc::clone(slots);
            if let Some(pos) = table.recency.iter().position(|k| &**k == credential) {
                if let Some(key) = table.recency.remove(pos) {
                    table.recency.push_back(key);
                }
            }
            return slots;
        }

        if table.pools.len() >= self.max_tracked_keys {
            Self::evict_lru_idle(table);
        }

        let key: Arc<str> = Arc::from(credential);
        let slots = Arc::new(KeySlots::new());
        table.pools.insert(Arc::clone(&key), Arc::clone(&slots));
        table.recency.push_back(key);
        slots
    }

    /// Evict the least-recently-used pool if it is idle.
    ///
    /// A pool with outstanding slots must not be evicted out from under its
    /// in-flight requests; when the LRU candidate is busy the attempt stops
    /// here, and the table temporarily exceeds `max_tracked_keys` until load
    /// subsides.
    fn evict_lru_idle(table: &mut PoolTable) {
        let Some(candidate) = table.recency.front() else { return };

        let idle = table.pools.get(candidate).is_none_or(|s| s.is_idle());
        if !idle {
            tracing::debug!(
                key_prefix = credential_prefix(candidate),
                "LRU slot pool has in-flight requests; skipping eviction"
            );
            return;
        }

        if let Some(key) = table.recency.pop_front() {
            table.pools.remove(&key);
            tracing::debug!(key_prefix = credential_prefix(&key), "evicted idle slot pool");
        }
    }
}

/// RAII slot reservation for one in-flight request.
///
/// Releasing on drop covers every exit path: normal completion, handler
/// errors, panics, and task cancellation when the client disconnects.
pub struct SlotGuard {
    slots: Arc<KeySlots>,
    key_prefix: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // The slot count must never wrap below zero.
        let _ = self
            .slots
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        prometheus::decrement_active_requests(&self.key_prefix);
    }
}

/// Transport-layer middleware applying the gate to the limited paths.
pub async fn concurrency_gate_middleware(
    State(gate): State<Arc<ConcurrencyGate>>,
    request: Request,
    next: Next,
) -> Response {
    if !ConcurrencyGate::is_limited_path(request.uri().path()) {
        return next.run(request).await;
    }
    let path = request.uri().path().to_string();

    // Anonymous traffic is throttled by a separate limiter; the per-key gate
    // only meters identified callers.
    let credential = match extract_bearer_credential(request.headers()) {
        Some(c) => c.to_string(),
        None => return next.run(request).await,
    };

    match gate.try_acquire(&credential) {
        Some(_guard) => {
            // Guard dropped when this future completes or is cancelled.
            next.run(request).await
        }
        None => {
            prometheus::record_concurrency_rejection();
            tracing::warn!(
                key_prefix = credential_prefix(&credential),
                %path,
                "concurrent request limit reached"
            );
            concurrency_rejection()
        }
    }
}

/// Build the structured 429 for a saturated key.
fn concurrency_rejection() -> Response {
    let body = serde_json::json!({
        "error": {
            "message": "Too many concurrent requests for this API key. Please reduce parallelism.",
            "type": "rate_limit_error",
            "code": 429
        }
    })
    .to_string();

    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::RETRY_AFTER, RETRY_AFTER_SECS)
        .header("X-RateLimit-Reason", "per_key_concurrency")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
