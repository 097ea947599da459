//! Axum router and server assembly.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::AppResult;
use crate::proxy::config::GatewayConfig;
use crate::proxy::handlers;
use crate::proxy::middleware::{concurrency_gate_middleware, cors_layer, ConcurrencyGate};
use crate::proxy::rate_limit::{endpoint_rate_limit_middleware, RateLimitRegistry};
use crate::proxy::upstream::{UpstreamClient, MAX_RELAY_BODY_BYTES};

/// Axum application state shared by handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<ConcurrencyGate>,
    pub limiters: Arc<RateLimitRegistry>,
    pub upstream: Arc<UpstreamClient>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> AppResult<Self> {
        let gate = Arc::new(ConcurrencyGate::new(&config.concurrency));
        let limiters = Arc::new(RateLimitRegistry::new());
        let upstream = Arc::new(UpstreamClient::new(&config.upstream)?);

        Ok(Self { gate, limiters, upstream, config: Arc::new(config) })
    }
}

/// Build the gateway router.
///
/// Layer order (outermost first): CORS → concurrency gate → trace → body
/// limit → route dispatch → per-route window guard → handler. The gate sits
/// at the transport layer so a saturated key is rejected before any route
/// work happens; the window guards sit on their routes so each endpoint
/// draws on its own budget.
pub fn build_proxy_router(state: AppState) -> Router<()> {
    let limits = &state.config.endpoint_limits;
    let chat = state.limiters.limiter(
        "chat_completions",
        limits.chat_completions.max_requests,
        limits.chat_completions.window_seconds,
    );
    let messages = state.limiters.limiter(
        "messages",
        limits.messages.max_requests,
        limits.messages.window_seconds,
    );
    let images = state.limiters.limiter(
        "images_generations",
        limits.images_generations.max_requests,
        limits.images_generations.window_seconds,
    );

    Router::new()
        // OpenAI protocol
        .route(
            "/v1/chat/completions",
            post(handlers::handle_inference_proxy).layer(axum::middleware::from_fn_with_state(
                chat.clone(),
                endpoint_rate_limit_middleware,
            )),
        )
        .route(
            "/v1/images/generations",
            post(handlers::handle_inference_proxy).layer(axum::middleware::from_fn_with_state(
                images,
                endpoint_rate_limit_middleware,
            )),
        )
        // Claude protocol
        .route(
            "/v1/messages",
            post(handlers::handle_inference_proxy).layer(axum::middleware::from_fn_with_state(
                messages,
                endpoint_rate_limit_middleware,
            )),
        )
        // Vercel AI SDK shim - shares the chat_completions budget
        .route(
            "/ai-sdk/chat/completions",
            post(handlers::handle_inference_proxy).layer(axum::middleware::from_fn_with_state(
                chat,
                endpoint_rate_limit_middleware,
            )),
        )
        // Utility
        .route("/healthz", get(handlers::handle_health))
        .route("/health", get(handlers::handle_health))
        .route("/metrics", get(handlers::handle_metrics))
        .layer(DefaultBodyLimit::max(MAX_RELAY_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.gate),
            concurrency_gate_middleware,
        ))
        .layer(cors_layer())
        .with_state(state)
}

/// Axum server instance.
pub struct AxumServer {
    config: GatewayConfig,
}

impl AxumServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> AppResult<()> {
        let host = if self.config.server.allow_lan_access { "0.0.0.0" } else { "127.0.0.1" };
        let addr = format!("{}:{}", host, self.config.server.port);
        tracing::info!("Starting Axum server on {}", addr);

        let state = AppState::new(self.config)?;
        let app = build_proxy_router(state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
