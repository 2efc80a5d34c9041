// =============================================================================
// Bearer Token Authentication — Axum Middleware
// =============================================================================
//
// Validates the `Authorization: Bearer <token>` header against the
// `CANDLESYNC_ADMIN_TOKEN` environment variable. Comparison runs in constant
// time. A missing or invalid token short-circuits the request with a 403 JSON
// body before the handler executes.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Compare two byte slices in constant time. Every byte of both slices is
/// examined even when a mismatch is found early. A length mismatch already
/// leaks that the lengths differ, which is acceptable here: the caller does
/// not control the expected token length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Axum extractor gating the authenticated query endpoints. Yields the raw
/// token string on success (useful for audit logging downstream).
pub struct AuthBearer(pub String);

pub struct AuthRejection(&'static str);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0 });
        (StatusCode::FORBIDDEN, axum::Json(body)).into_response()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Read the expected token per request so rotation needs no restart.
        let expected = std::env::var("CANDLESYNC_ADMIN_TOKEN").unwrap_or_default();
        if expected.is_empty() {
            warn!("CANDLESYNC_ADMIN_TOKEN is not set — rejecting all authenticated requests");
            return Err(AuthRejection("Server authentication not configured"));
        }

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(token) = token else {
            warn!("Missing or malformed Authorization header");
            return Err(AuthRejection("Missing or invalid authorization token"));
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("Invalid admin token presented");
            return Err(AuthRejection("Invalid authorization token"));
        }

        Ok(AuthBearer(token.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
