// CORS middleware
use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS layer for the gateway surface.
///
/// The inference endpoints are consumed by programmatic clients and by
/// browser-side SDKs (the `/ai-sdk/` route); credentials travel in the
/// Authorization header, so a wildcard origin without cookies is safe here.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_creation() {
        let _layer = cors_layer();
        // Layer creation succeeded - type system ensures correctness
    }
}
