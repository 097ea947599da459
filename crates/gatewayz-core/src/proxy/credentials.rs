//! Bearer-credential extraction shared by the admission components.
//!
//! Neither component validates credentials; validation belongs to the
//! authentication layer downstream. The raw token string is only used as a
//! rate-limiting key.

use axum::http::{header, HeaderMap};

/// Tokens at or below this length are treated as anonymous traffic and are
/// skipped by per-key admission control (anonymous throttling is handled by
/// a separate limiter outside this crate).
pub const MIN_CREDENTIAL_LEN: usize = 10;

/// Length of the key prefix used in logs and metric labels.
const PREFIX_LEN: usize = 8;

/// Extract the bearer credential from the `Authorization` header.
///
/// Returns `None` for missing headers, non-ASCII values, and implausibly
/// short tokens. All of these are treated as anonymous, never as errors.
pub fn extract_bearer_credential(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    if token.len() <= MIN_CREDENTIAL_LEN {
        return None;
    }
    Some(token)
}

/// Truncated key prefix for observability. Full credentials never appear in
/// logs or metric labels.
pub fn credential_prefix(credential: &str) -> &str {
    &credential[..credential.len().min(PREFIX_LEN)]
}
