//! Route handlers: inference-path forwarding plus health and metrics.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::time::Instant;

use crate::proxy::prometheus;
use crate::proxy::server::AppState;

/// Forward an admitted inference request upstream, recording request
/// metrics. Admission already happened in the middleware layers by the time
/// this runs.
pub async fn handle_inference_proxy(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_string();

    match state.upstream.forward(request).await {
        Ok(response) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let status = prometheus::status_category(response.status().as_u16());
            prometheus::record_request(&path, status, duration_ms);
            response
        }
        Err(e) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::error!(error = %e, path, "upstream forwarding failed");
            prometheus::record_request(&path, "5xx", duration_ms);
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}

pub async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn handle_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        prometheus::render_metrics(),
    )
}
