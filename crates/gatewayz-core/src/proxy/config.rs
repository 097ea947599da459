//! Gateway configuration types.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppError, AppResult};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream forwarding settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Per-key concurrency gate settings.
    #[serde(default)]
    pub concurrency: ConcurrencyGateConfig,

    /// Per-endpoint fixed-window budgets.
    #[serde(default)]
    pub endpoint_limits: EndpointLimitsConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,

    /// Allow LAN access (bind to 0.0.0.0 instead of 127.0.0.1).
    pub allow_lan_access: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080, allow_lan_access: false }
    }
}

/// Upstream forwarding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL requests are relayed to; the inbound path is appended as-is.
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub request_timeout: u64,
}

fn default_timeout() -> u64 {
    120
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { base_url: "https://openrouter.ai/api".to_string(), request_timeout: 120 }
    }
}

/// Per-key concurrency gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyGateConfig {
    /// Maximum simultaneous in-flight requests per API key.
    #[serde(default = "default_max_concurrent_per_key")]
    pub max_concurrent_per_key: u32,

    /// Maximum distinct keys tracked before idle pools are evicted.
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

fn default_max_concurrent_per_key() -> u32 {
    5
}

fn default_max_tracked_keys() -> usize {
    2000
}

impl Default for ConcurrencyGateConfig {
    fn default() -> Self {
        Self { max_concurrent_per_key: 5, max_tracked_keys: 2000 }
    }
}

/// One endpoint's fixed-window budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointLimitConfig {
    /// Requests allowed per window.
    pub max_requests: u32,

    /// Window length in seconds.
    pub window_seconds: u64,
}

impl Default for EndpointLimitConfig {
    fn default() -> Self {
        Self { max_requests: 60, window_seconds: 60 }
    }
}

/// Window budgets for the guarded routes.
///
/// Both chat routes (`/v1/chat/completions` and `/ai-sdk/chat/completions`)
/// draw on the `chat_completions` budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointLimitsConfig {
    #[serde(default)]
    pub chat_completions: EndpointLimitConfig,

    #[serde(default)]
    pub messages: EndpointLimitConfig,

    #[serde(default)]
    pub images_generations: EndpointLimitConfig,
}

/// Load gateway configuration from a JSON file.
///
/// A missing file yields the defaults; a malformed file is an error.
pub fn load_config(path: &Path) -> AppResult<GatewayConfig> {
    if !path.exists() {
        return Ok(GatewayConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| AppError::Config(format!("failed to parse {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.concurrency.max_concurrent_per_key, 5);
        assert_eq!(config.concurrency.max_tracked_keys, 2000);
        assert_eq!(config.endpoint_limits.chat_completions.max_requests, 60);
        assert_eq!(config.endpoint_limits.chat_completions.window_seconds, 60);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.server.port, ServerConfig::default().port);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"{"server": {"port": 9000, "allow_lan_access": true},
                 "concurrency": {"max_concurrent_per_key": 2}}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.server.allow_lan_access);
        assert_eq!(config.concurrency.max_concurrent_per_key, 2);
        // Unspecified fields keep their defaults
        assert_eq!(config.concurrency.max_tracked_keys, 2000);
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, "not json").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "unexpected error: {err:?}");
    }
}
