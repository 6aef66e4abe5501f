//! End-to-end proxy tests: a real listener in front of a mock upstream.

use std::sync::Arc;
use std::time::Duration;

use mcp_guardian::models::ApprovalStatus;
use mcp_guardian::snapshot::Snapshotter;
use mcp_guardian::test_utils::test_helpers;
use mcp_guardian::upstream::UpstreamClient;
use mcp_guardian::{build_router, AppState};
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_app(state: AppState) -> String {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Registers a service directly through the repository and makes it visible
/// to the proxy.
async fn register_service(state: &AppState, name: &str, upstream_url: &str, enabled: bool) {
    let service = state
        .repo
        .create_service(name, upstream_url, enabled, 0)
        .await
        .unwrap();
    state
        .repo
        .insert_snapshot(service.id, "{}", &"a".repeat(64), ApprovalStatus::UserApproved)
        .await
        .unwrap();
    state.registry.reload(state.repo.as_ref()).await.unwrap();
}

#[tokio::test]
async fn unknown_service_is_404() {
    let (state, _pool) = test_helpers::create_test_state("pw").await;
    let base = spawn_app(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/unknown/mcp"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Service not configured"}));
}

#[tokio::test]
async fn disabled_service_is_403() {
    let (state, _pool) = test_helpers::create_test_state("pw").await;
    register_service(&state, "svc1", "http://127.0.0.1:9/mcp", false).await;
    let base = spawn_app(state).await;

    let client = reqwest::Client::new();
    for request in [
        client.post(format!("{base}/svc1/mcp")).body("{}"),
        client.get(format!("{base}/svc1/mcp")),
    ] {
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), 403);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, json!({"error": "Service disabled pending review"}));
    }
}

#[tokio::test]
async fn post_bodies_and_session_headers_pass_through_untouched() {
    let upstream = MockServer::start().await;
    let request_body = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo"}}"#;
    let response_body = r#"{"jsonrpc":"2.0","id":7,"result":{"content":[{"type":"text","text":"hi"}]}}"#;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_string(request_body))
        .and(header("mcp-session-id", "sess-9"))
        .and(header("mcp-protocol-version", "2024-11-05"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .insert_header("mcp-session-id", "sess-9")
                .set_body_raw(response_body.as_bytes().to_vec(), "application/json"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let (state, _pool) = test_helpers::create_test_state("pw").await;
    register_service(&state, "svc1", &format!("{}/mcp", upstream.uri()), true).await;
    let base = spawn_app(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/svc1/mcp"))
        .header("content-type", "application/json")
        .header("mcp-session-id", "sess-9")
        .header("mcp-protocol-version", "2024-11-05")
        .body(request_body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    // The session id assigned by the upstream must reach the client.
    assert_eq!(response.headers().get("mcp-session-id").unwrap(), "sess-9");
    let bytes = response.bytes().await.unwrap();
    assert_eq!(&bytes[..], response_body.as_bytes());
}

#[tokio::test]
async fn upstream_status_codes_are_mirrored() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_raw(br#"{"error":"conflict"}"#.to_vec(), "application/json"),
        )
        .mount(&upstream)
        .await;

    let (state, _pool) = test_helpers::create_test_state("pw").await;
    register_service(&state, "svc1", &format!("{}/mcp", upstream.uri()), true).await;
    let base = spawn_app(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/svc1/mcp"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 409);
    assert_eq!(response.text().await.unwrap(), r#"{"error":"conflict"}"#);
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let (state, _pool) = test_helpers::create_test_state("pw").await;
    // Nothing listens on port 9.
    register_service(&state, "svc1", "http://127.0.0.1:9/mcp", true).await;
    let base = spawn_app(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/svc1/mcp"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn slow_upstream_is_504() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_raw(b"{}".to_vec(), "application/json"),
        )
        .mount(&upstream)
        .await;

    let (state, _pool) = test_helpers::create_test_state("pw").await;
    // Rebuild the state with a much tighter first-byte deadline.
    let client = Arc::new(UpstreamClient::new(Duration::from_millis(200)));
    let state = AppState {
        config: state.config.clone(),
        repo: state.repo.clone(),
        registry: state.registry.clone(),
        upstream: client.clone(),
        snapshotter: Snapshotter::new(client),
    };
    register_service(&state, "svc1", &format!("{}/mcp", upstream.uri()), true).await;
    let base = spawn_app(state).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/svc1/mcp"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 504);
}

#[tokio::test]
async fn sse_frames_and_event_ids_pass_through_verbatim() {
    let upstream = MockServer::start().await;
    let frames = concat!(
        "id: 43\n",
        "event: message\n",
        "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n",
        "\n",
        "id: 44\n",
        "event: message\n",
        "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n",
        "\n",
    );

    // The client's resume position must be forwarded to the upstream.
    Mock::given(method("GET"))
        .and(path("/mcp"))
        .and(header("last-event-id", "42"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(frames.as_bytes().to_vec(), "text/event-stream"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let (state, _pool) = test_helpers::create_test_state("pw").await;
    register_service(&state, "svc1", &format!("{}/mcp", upstream.uri()), true).await;
    let base = spawn_app(state).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/svc1/mcp"))
        .header("accept", "text/event-stream")
        .header("last-event-id", "42")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    // The whole stream arrives unmodified and ends with a clean EOF once
    // the upstream closes.
    let body = response.text().await.unwrap();
    assert_eq!(body, frames);
}

#[tokio::test]
async fn delete_requests_are_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "sess-9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&upstream)
        .await;

    let (state, _pool) = test_helpers::create_test_state("pw").await;
    register_service(&state, "svc1", &format!("{}/mcp", upstream.uri()), true).await;
    let base = spawn_app(state).await;

    let response = reqwest::Client::new()
        .delete(format!("{base}/svc1/mcp"))
        .header("mcp-session-id", "sess-9")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
}
