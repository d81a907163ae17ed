// =============================================================================
// Bearer Token Authentication — Axum Extractor
// =============================================================================
//
// Guards the settings endpoint. The expected token is `AppState::admin_token`
// (from `AURORA_ADMIN_TOKEN` at startup). Comparison runs in constant time.
//
//   async fn handler(_auth: AdminAuth, ...) { ... }
//
// A missing, malformed or wrong token short-circuits with 403 before the
// handler runs. With no token configured every guarded request is refused.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;

/// Compare two byte slices without exiting early on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check a presented token against the configured one.
pub fn token_matches(expected: Option<&str>, presented: &str) -> bool {
    match expected {
        Some(expected) if !expected.is_empty() => constant_time_eq(presented.as_bytes(), expected.as_bytes()),
        _ => false,
    }
}

/// Proof that the request carried the admin bearer token.
pub struct AdminAuth;

pub struct AuthRejection {
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (StatusCode::FORBIDDEN, axum::Json(body)).into_response()
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            warn!("AURORA_ADMIN_TOKEN is not set, refusing admin request");
            return Err(AuthRejection {
                message: "Server authentication not configured",
            });
        };

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(token) = token else {
            warn!("missing or malformed Authorization header");
            return Err(AuthRejection {
                message: "Missing or invalid authorization token",
            });
        };

        if !token_matches(Some(expected), token) {
            warn!("invalid admin token presented");
            return Err(AuthRejection {
                message: "Invalid authorization token",
            });
        }
        Ok(AdminAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer_string"));
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }

    #[test]
    fn unconfigured_token_never_matches() {
        assert!(!token_matches(None, "anything"));
        assert!(!token_matches(Some(""), ""));
        assert!(token_matches(Some("s3cret"), "s3cret"));
        assert!(!token_matches(Some("s3cret"), "s3cre"));
    }
}
