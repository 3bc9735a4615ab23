//! API authentication middleware (spec.md §4.8 middleware chain step 2).
//!
//! Reads the env var named by `config.auth.api_token_env` (default
//! `SHANNON_API_TOKEN`) **once at startup** and caches the SHA-256 digest
//! in `AppState`.
//! - Accepts the token in either `X-API-Key` or `Authorization: Bearer`.
//!   A vendor-style `Bearer sk-shannon-<token>` prefix on the key is
//!   stripped before comparison, so a client can carry either the bare
//!   token or a prefixed one.
//! - If `config.auth.disabled` is set (or the env var is unset/empty at
//!   startup), the server logs a warning once and allows unauthenticated
//!   access (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Strips a vendor prefix (`sk-shannon-`, `shannon-`) some clients
/// prepend to the configured token before sending it. Keys with no
/// recognized prefix are compared as-is.
fn normalize_key(raw: &str) -> &str {
    raw.strip_prefix("sk-shannon-")
        .or_else(|| raw.strip_prefix("shannon-"))
        .unwrap_or(raw)
}

/// Extracts the caller-supplied token from `X-API-Key` or
/// `Authorization: Bearer`, preferring the former (spec.md §4.8).
fn extract_token(headers: &HeaderMap) -> &str {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return normalize_key(key);
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(normalize_key)
        .unwrap_or("")
}

/// Axum middleware that enforces token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // `api_token_hash` is `None` in dev mode (auth disabled, or no token
    // configured at startup).
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = extract_token(req.headers());
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API key" })),
        )
            .into_response();
    }

    next.run(req).await
}
