//! Transparent proxy for `/{service_name}/mcp`.
//!
//! The proxy never parses JSON-RPC traffic. It checks the route registry
//! once per request, rewrites nothing but the target URL, strips hop-by-hop
//! headers in both directions, and otherwise relays bytes. SSE responses are
//! bridged chunk-by-chunk so event frames, and in particular `id:` lines,
//! reach the client exactly as the upstream emitted them; a client that
//! reconnects with `Last-Event-ID` therefore resumes against the upstream's
//! own event numbering.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::upstream::{filter_headers, UpstreamError};
use crate::AppState;

/// Handles `POST`, `GET` and `DELETE` on `/{service_name}/mcp`.
pub async fn proxy_handler(
    Path(service_name): Path<String>,
    State(state): State<AppState>,
    request: Request,
) -> Response {
    // One registry consultation per request; a reload happening after this
    // point does not affect the stream we are about to open.
    let entry = match state.registry.lookup(&service_name).await {
        Some(entry) => entry,
        None => {
            tracing::warn!(service = %service_name, "request for unknown service");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Service not configured"})),
            )
                .into_response();
        }
    };

    if !entry.enabled {
        tracing::warn!(service = %service_name, "request for disabled service");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Service disabled pending review"})),
        )
            .into_response();
    }

    let method = request.method().clone();
    let headers = filter_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            tracing::warn!(service = %service_name, error = %e, "failed to read request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Failed to read request body"})),
            )
                .into_response();
        }
    };

    tracing::debug!(service = %service_name, %method, upstream = %entry.upstream_url, "proxying request");

    let upstream_response = match state
        .upstream
        .forward(method, &entry.upstream_url, headers, body)
        .await
    {
        Ok(response) => response,
        Err(UpstreamError::Timeout) => {
            tracing::error!(service = %service_name, "upstream timed out");
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({"error": "Upstream timeout"})),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(service = %service_name, error = %e, "upstream request failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": format!("Upstream error: {e}")})),
            )
                .into_response();
        }
    };

    bridge_response(&service_name, upstream_response).await
}

/// Mirrors the upstream response downstream.
///
/// JSON (and any other non-streaming) bodies are buffered and relayed in
/// one piece; `text/event-stream` bodies are passed through as a stream so
/// each frame is flushed as it arrives and never buffered across frames.
async fn bridge_response(service_name: &str, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = filter_headers(upstream.headers());

    let is_event_stream = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("text/event-stream"))
        .unwrap_or(false);

    let body = if is_event_stream {
        // Upstream EOF propagates as a clean end of stream; a downstream
        // disconnect drops this body and cancels the upstream read.
        Body::from_stream(upstream.bytes_stream())
    } else {
        match upstream.bytes().await {
            Ok(bytes) => Body::from(bytes),
            Err(e) => {
                tracing::error!(service = %service_name, error = %e, "failed to read upstream body");
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({"error": format!("Upstream error: {e}")})),
                )
                    .into_response();
            }
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
