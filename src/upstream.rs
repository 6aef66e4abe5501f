//! HTTP client for upstream MCP servers.
//!
//! Two kinds of traffic flow through here. The snapshotter issues typed
//! JSON-RPC calls (`initialize` and the paginated listing methods); the
//! proxy engine forwards raw requests byte-for-byte. Both share one pooled
//! [`reqwest::Client`].
//!
//! Per the Streamable HTTP transport an upstream may answer a POSTed
//! JSON-RPC request either with a plain JSON body or with an SSE stream that
//! carries the response as an event; [`UpstreamClient::send_jsonrpc`]
//! handles both.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName};
use futures_util::StreamExt;
use serde_json::{json, Value};

/// Protocol version sent in `initialize` and the `MCP-Protocol-Version` header.
pub const CLIENT_PROTOCOL_VERSION: &str = "2024-11-05";

const CLIENT_NAME: &str = "mcp-guardian";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hop-by-hop headers that must never cross the proxy, plus `host` and
/// `content-length`, which the client recomputes for the rewritten request.
static SKIPPED_HEADERS: LazyLock<[HeaderName; 10]> = LazyLock::new(|| {
    [
        header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::HOST,
        header::CONTENT_LENGTH,
    ]
});

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("upstream timed out")]
    Timeout,

    #[error("upstream protocol error: {0}")]
    Protocol(String),

    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Unreachable(err)
        }
    }
}

/// JSON-RPC method-not-found, treated as "capability absent" by listings.
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone)]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: Value,
}

/// Removes headers the proxy must not forward; everything else passes
/// through verbatim, in both directions.
pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if SKIPPED_HEADERS.contains(name) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Thin client for MCP over Streamable HTTP.
///
/// Safe to share across tasks; reqwest's client pools connections
/// internally.
#[derive(Debug)]
pub struct UpstreamClient {
    client: reqwest::Client,
    /// Whole-call deadline for typed JSON-RPC calls, and first-byte deadline
    /// for forwarded requests.
    request_timeout: Duration,
    next_id: AtomicI64,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl UpstreamClient {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            request_timeout,
            next_id: AtomicI64::new(1),
        }
    }

    /// Runs the MCP `initialize` handshake against an upstream.
    pub async fn initialize(&self, url: &str) -> Result<InitializeResult, UpstreamError> {
        let params = json!({
            "protocolVersion": CLIENT_PROTOCOL_VERSION,
            "capabilities": {
                "roots": {"listChanged": false},
                "sampling": {},
            },
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": CLIENT_VERSION,
            },
        });

        let result = self.send_jsonrpc(url, "initialize", Some(params)).await?;

        let protocol_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                UpstreamError::Protocol("initialize result is missing protocolVersion".to_string())
            })?
            .to_string();

        Ok(InitializeResult {
            protocol_version,
            capabilities: result.get("capabilities").cloned().unwrap_or(json!({})),
            server_info: result.get("serverInfo").cloned().unwrap_or(json!({})),
        })
    }

    /// Lists every item a paginated MCP listing method advertises, following
    /// `nextCursor` until the upstream stops returning one.
    ///
    /// A JSON-RPC "method not found" means the upstream simply does not
    /// implement the capability and yields an empty list.
    pub async fn list(&self, url: &str, method: &str) -> Result<Vec<Value>, UpstreamError> {
        let items_key = match method {
            "tools/list" => "tools",
            "resources/list" => "resources",
            "resources/templates/list" => "resourceTemplates",
            "prompts/list" => "prompts",
            other => {
                return Err(UpstreamError::Protocol(format!(
                    "unsupported listing method '{other}'"
                )))
            }
        };

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = match self.send_jsonrpc(url, method, params).await {
                Ok(result) => result,
                Err(UpstreamError::JsonRpc { code, .. }) if code == METHOD_NOT_FOUND => {
                    tracing::debug!(method, "upstream does not implement listing method");
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err),
            };

            if let Some(page) = result.get(items_key).and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        Ok(items)
    }

    /// Sends one JSON-RPC request and returns its `result` member.
    pub async fn send_jsonrpc(
        &self,
        url: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, UpstreamError> {
        let mut request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
        });
        if let Some(params) = params {
            request["params"] = params;
        }

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .header("MCP-Protocol-Version", CLIENT_PROTOCOL_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Protocol(format!(
                "{method} returned HTTP {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let message = if content_type.starts_with("text/event-stream") {
            self.read_jsonrpc_from_sse(response).await?
        } else {
            let body = response.bytes().await?;
            serde_json::from_slice(&body).map_err(|e| {
                UpstreamError::Protocol(format!("invalid JSON body for {method}: {e}"))
            })?
        };

        unwrap_jsonrpc(message, method)
    }

    /// Scans an SSE response body for the first JSON-RPC response event.
    ///
    /// Servers may interleave notifications before the response; anything
    /// that is not a response object is skipped.
    async fn read_jsonrpc_from_sse(
        &self,
        response: reqwest::Response,
    ) -> Result<Value, UpstreamError> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(UpstreamError::from)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(boundary) = buffer.find("\n\n") {
                let event: String = buffer.drain(..boundary + 2).collect();

                let data: String = event
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(|line| line.strip_prefix(' ').unwrap_or(line))
                    .collect::<Vec<_>>()
                    .join("\n");
                if data.is_empty() {
                    continue;
                }

                if let Ok(message) = serde_json::from_str::<Value>(&data) {
                    if message.get("result").is_some() || message.get("error").is_some() {
                        return Ok(message);
                    }
                }
            }
        }

        Err(UpstreamError::Protocol(
            "SSE stream ended without a JSON-RPC response".to_string(),
        ))
    }

    /// Forwards a raw request and hands back the upstream response without
    /// touching its body.
    ///
    /// The deadline covers the exchange up to the response headers only, so
    /// long-lived SSE bodies are never cut off by it.
    pub async fn forward(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let request = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body);

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        Ok(response)
    }
}

fn unwrap_jsonrpc(message: Value, method: &str) -> Result<Value, UpstreamError> {
    if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(UpstreamError::Protocol(format!(
            "{method} response is not JSON-RPC 2.0"
        )));
    }

    if let Some(error) = message.get("error") {
        return Err(UpstreamError::JsonRpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            data: error.get("data").cloned(),
        });
    }

    message
        .get("result")
        .cloned()
        .ok_or_else(|| UpstreamError::Protocol(format!("{method} response has no result")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));

        assert!(filter_headers(&headers).is_empty());
    }

    #[test]
    fn mcp_headers_pass_through() {
        let mut headers = HeaderMap::new();
        headers.insert("mcp-session-id", HeaderValue::from_static("abc-123"));
        headers.insert("mcp-protocol-version", HeaderValue::from_static("2024-11-05"));
        headers.insert("last-event-id", HeaderValue::from_static("42"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));

        let filtered = filter_headers(&headers);
        assert_eq!(filtered.len(), 5);
        assert_eq!(filtered.get("last-event-id").unwrap(), "42");
        assert_eq!(filtered.get("mcp-session-id").unwrap(), "abc-123");
    }

    #[test]
    fn jsonrpc_error_objects_become_typed_errors() {
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "Method not found"},
        });
        match unwrap_jsonrpc(message, "tools/list") {
            Err(UpstreamError::JsonRpc { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected JsonRpc error, got {other:?}"),
        }
    }

    #[test]
    fn missing_jsonrpc_marker_is_a_protocol_error() {
        let message = serde_json::json!({"id": 1, "result": {}});
        assert!(matches!(
            unwrap_jsonrpc(message, "initialize"),
            Err(UpstreamError::Protocol(_))
        ));
    }
}
