//! Byte-transparent upstream forwarding.
//!
//! Relays an admitted inference request to the configured upstream base URL
//! and streams the response back. No provider-specific transformation
//! happens here: bodies, methods, and status codes (including upstream 4xx
//! and 5xx) pass through untouched. Only hop-by-hop headers are stripped.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName};
use axum::response::Response;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::proxy::config::UpstreamConfig;

/// Largest request body the relay will buffer. Matches the router's body
/// limit so the relay is never the stricter bound.
pub const MAX_RELAY_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Resolve the upstream base URL, allowing an env override for deployments
/// that cannot edit the config file.
fn resolve_base_url(configured: &str) -> String {
    if let Ok(raw) = std::env::var("GATEWAYZ_UPSTREAM_URL") {
        let url = raw.trim().trim_end_matches('/').to_string();
        if url.is_empty() || reqwest::Url::parse(&url).is_err() {
            tracing::warn!("GATEWAYZ_UPSTREAM_URL is not a valid URL, using configured default");
            return configured.trim_end_matches('/').to_string();
        }
        tracing::info!("Using custom upstream URL from environment");
        return url;
    }
    configured.trim_end_matches('/').to_string()
}

/// Headers that must not be relayed in either direction: hop-by-hop headers
/// plus those the relay recomputes itself.
fn is_skipped_header(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::HOST
        || name.as_str() == "keep-alive"
}

pub struct UpstreamClient {
    http_client: Client,
    base_url: String,
}

impl UpstreamClient {
    /// Create a new UpstreamClient with a shared HTTP client.
    ///
    /// The client is built once at startup; per-request construction would
    /// discard connection pooling and redo TLS setup on the hot path.
    pub fn new(config: &UpstreamConfig) -> AppResult<Self> {
        let http_client =
            Client::builder().timeout(Duration::from_secs(config.request_timeout)).build()?;

        Ok(Self { http_client, base_url: resolve_base_url(&config.base_url) })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Relay `request` to the upstream and stream the response back.
    pub async fn forward(&self, request: Request) -> AppResult<Response> {
        let (parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
        let url = format!("{}{}", self.base_url, path_and_query);

        let body_bytes: Bytes = axum::body::to_bytes(body, MAX_RELAY_BODY_BYTES)
            .await
            .map_err(|e| AppError::Proxy(format!("failed to buffer request body: {e}")))?;

        let mut upstream_request = self.http_client.request(parts.method.clone(), &url);
        for (name, value) in &parts.headers {
            if is_skipped_header(name) || name == header::CONTENT_LENGTH {
                continue;
            }
            upstream_request = upstream_request.header(name, value);
        }

        let upstream_response = upstream_request.body(body_bytes).send().await?;

        let mut builder = Response::builder().status(upstream_response.status());
        for (name, value) in upstream_response.headers() {
            if is_skipped_header(name) {
                continue;
            }
            builder = builder.header(name, value);
        }

        builder
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| AppError::Proxy(format!("failed to assemble relay response: {e}")))
    }
}
