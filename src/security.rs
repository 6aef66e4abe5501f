//! HTTP Basic authentication for the admin surface.
//!
//! Only the password is checked; the username is ignored. Comparison is
//! constant time so a remote caller cannot narrow the password by timing.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::AppState;

const WWW_AUTHENTICATE: &str = "Basic realm=\"MCP Guardian Admin\"";

pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(parse_basic_password)
        .map(|password| {
            password
                .as_bytes()
                .ct_eq(state.config.admin_password.as_bytes())
                .into()
        })
        .unwrap_or(false);

    if !authorized {
        tracing::warn!("rejected admin request with missing or invalid credentials");
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, HeaderValue::from_static(WWW_AUTHENTICATE))],
            Json(json!({"error": "Invalid credentials"})),
        )
            .into_response();
    }

    next.run(request).await
}

fn parse_basic_password(value: &HeaderValue) -> Option<String> {
    let encoded = value.to_str().ok()?.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_username, password) = credentials.split_once(':')?;
    Some(password.to_string())
}
