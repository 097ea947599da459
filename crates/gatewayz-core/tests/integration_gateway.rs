#![allow(unused_crate_dependencies)]
#![allow(clippy::tests_outside_test_module, reason = "integration tests live in tests/ dir")]
#![allow(clippy::expect_used, reason = "integration test — panics are the assertion mechanism")]

use gatewayz_core::proxy::config::GatewayConfig;
use gatewayz_core::proxy::server::{build_proxy_router, AppState};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "sk-test-key-e2e-00001";

fn chat_success_body() -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-mock-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello from mock!"},
            "finish_reason": "stop"
        }]
    })
}

fn request_body() -> serde_json::Value {
    serde_json::json!({
        "model": "gpt-4o-mini",
        "messages": [{"role": "user", "content": "Hi"}]
    })
}

fn test_server(upstream_url: &str) -> axum_test::TestServer {
    let mut config = GatewayConfig::default();
    config.upstream.base_url = upstream_url.to_string();

    let state = AppState::new(config).expect("state construction");
    axum_test::TestServer::new(build_proxy_router(state)).expect("test server")
}

#[tokio::test]
async fn test_forwarding_propagates_status_and_body() {
    let upstream = MockServer::start().await;
    let server = test_server(&upstream.uri());

    {
        let _guard = Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_success_body()))
            .expect(1)
            .mount_as_scoped(&upstream)
            .await;

        let response = server
            .post("/v1/chat/completions")
            .authorization_bearer(TOKEN)
            .json(&request_body())
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["choices"][0]["message"]["content"], "Hello from mock!");
    }

    {
        let _guard = Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "upstream says slow down", "code": 429}
            })))
            .mount_as_scoped(&upstream)
            .await;

        let response = server
            .post("/v1/chat/completions")
            .authorization_bearer(TOKEN)
            .json(&request_body())
            .await;

        // Upstream 429s pass through untouched; they carry no local
        // X-RateLimit-Reason tag
        assert_eq!(response.status_code(), 429, "upstream 429 should pass through");
        assert!(response.maybe_header("X-RateLimit-Reason").is_none());
    }

    {
        let _guard = Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount_as_scoped(&upstream)
            .await;

        let response = server
            .post("/v1/chat/completions")
            .authorization_bearer(TOKEN)
            .json(&request_body())
            .await;

        assert_eq!(response.status_code(), 500, "upstream 500 should pass through");
    }
}

#[tokio::test]
async fn test_anonymous_requests_are_forwarded_not_limited() {
    let upstream = MockServer::start().await;
    let server = test_server(&upstream.uri());

    let _guard = Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success_body()))
        .expect(3)
        .mount_as_scoped(&upstream)
        .await;

    // No Authorization header at all: neither component interferes
    for _ in 0..3 {
        server.post("/v1/messages").json(&request_body()).await.assert_status_ok();
    }
}

#[tokio::test]
async fn test_health_and_metrics_bypass_admission() {
    let upstream = MockServer::start().await;
    let server = test_server(&upstream.uri());

    server.get("/healthz").await.assert_status_ok();
    let health: serde_json::Value = server.get("/health").await.json();
    assert_eq!(health["status"], "ok");

    // Renders whether or not the global recorder is installed
    let metrics = server.get("/metrics").await;
    metrics.assert_status_ok();
    assert!(!metrics.text().is_empty());
}
