//! # Authentication Module
//!
//! Bearer key authentication for the development server.
//!
//! When `[server] api_key` (or `ARCHSYNC_API_KEY`) is set, every request
//! except `/health` must carry:
//! ```text
//! Authorization: Bearer <your-api-key>
//! ```

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// The key the server expects.
#[derive(Clone)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    /// `None` for an empty key, which leaves authentication disabled.
    #[must_use]
    pub fn new(key: &str) -> Option<Self> {
        (!key.is_empty()).then(|| Self(Arc::from(key)))
    }

    /// Constant-time comparison. Both sides are padded to the same length so
    /// the comparison never stops early on a length mismatch.
    #[must_use]
    pub fn matches(&self, provided: &str) -> bool {
        let provided = provided.as_bytes();
        let expected = self.0.as_bytes();

        let len = provided.len().max(expected.len());
        let mut lhs = vec![0u8; len];
        let mut rhs = vec![0u8; len];
        lhs[..provided.len()].copy_from_slice(provided);
        rhs[..expected.len()].copy_from_slice(expected);

        let bytes_match: bool = lhs.ct_eq(&rhs).into();
        bytes_match && provided.len() == expected.len()
    }
}

/// Rejects requests without the configured bearer key. `/health` is open.
pub async fn api_key_auth_middleware(
    State(expected): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));

    match provided {
        Some(key) if expected.matches(key) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(
                event = "auth_failure",
                reason = "invalid_api_key",
                "Authentication failed: invalid API key"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "Missing Authorization header"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}
