//! Authentication middleware for Axum
//!
//! Extracts the bearer credential from requests, verifies it through the
//! [`AuthGate`], and rejects the request before any handler (or WebSocket
//! upgrade) runs. Provides the `RequireAuth` extractor for handlers.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use opsgate_core::auth::{AuthError, AuthGate, Claims};

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    error: String,
    code: String,
}

impl AuthErrorResponse {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Auth rejection type
pub struct AuthRejection {
    status: StatusCode,
    body: AuthErrorResponse,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AuthError> for AuthRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new(
                    "Authentication required. Provide Authorization: Bearer <token> or ?token=.",
                    "UNAUTHORIZED",
                ),
            },
            AuthError::Malformed(_) | AuthError::InvalidSignature => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Invalid token signature", "INVALID_SIGNATURE"),
            },
            AuthError::Unauthorized(_) => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Invalid or expired token", "INVALID_CREDENTIALS"),
            },
            AuthError::KeyFetch(msg) => AuthRejection {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: AuthErrorResponse::new(
                    format!("Failed to fetch authentication keys: {msg}"),
                    "AUTH_KEYS_UNAVAILABLE",
                ),
            },
        }
    }
}

// ============================================================================
// RequireAuth Extractor
// ============================================================================

/// Axum extractor that requires a verified bearer credential.
///
/// Extracts the token from:
/// 1. `Authorization: Bearer <token>` header
/// 2. `?token=<token>` query parameter (for WebSocket connections)
pub struct RequireAuth(pub Claims);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        // Get the AuthGate from extensions
        let gate = parts
            .extensions
            .get::<Arc<AuthGate>>()
            .ok_or_else(|| AuthRejection {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: AuthErrorResponse::new("AuthGate not configured", "INTERNAL_ERROR"),
            })?
            .clone();

        let token = extract_token(parts)?;
        let claims = gate.verify(&token).await?;
        Ok(RequireAuth(claims))
    }
}

/// Extract the credential from request headers or query params
fn extract_token(parts: &Parts) -> std::result::Result<String, AuthError> {
    // 1. Authorization: Bearer <token>
    if let Some(auth_header) = parts.headers.get("authorization") {
        if let Ok(value) = auth_header.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Ok(token.trim().to_string());
            }
        }
    }

    // 2. ?token= query parameter (for WebSocket upgrades)
    if let Some(query) = parts.uri.query() {
        for param in query.split('&') {
            if let Some(token) = param.strip_prefix("token=") {
                return Ok(token.to_string());
            }
        }
    }

    Err(AuthError::MissingCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    fn parts_for(uri: &str, auth_header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth_header {
            builder = builder.header("authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn token_extracted_from_bearer_header() {
        let parts = parts_for("/ws/terminal", Some("Bearer abc.def.ghi"));
        assert_eq!(extract_token(&parts).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn token_extracted_from_query_param() {
        let parts = parts_for("/ws/terminal?token=abc.def.ghi", None);
        assert_eq!(extract_token(&parts).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn header_takes_precedence_over_query() {
        let parts = parts_for("/ws/terminal?token=from-query", Some("Bearer from-header"));
        assert_eq!(extract_token(&parts).unwrap(), "from-header");
    }

    #[test]
    fn missing_credential_is_reported() {
        let parts = parts_for("/ws/terminal", None);
        assert!(matches!(
            extract_token(&parts),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn rejection_maps_to_unauthorized() {
        let rejection = AuthRejection::from(AuthError::MissingCredentials);
        assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);

        let rejection = AuthRejection::from(AuthError::KeyFetch("down".to_string()));
        assert_eq!(rejection.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    fn protected_app() -> Router {
        // The JWKS endpoint is never contacted: both test requests fail
        // before key lookup (missing credential / malformed token).
        let gate = Arc::new(AuthGate::new("https://unused.invalid/jwks.json"));
        Router::new()
            .route("/protected", get(|RequireAuth(_): RequireAuth| async { "ok" }))
            .layer(Extension(gate))
    }

    #[tokio::test]
    async fn request_without_credential_is_rejected() {
        let response = protected_app()
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn request_with_garbage_token_is_rejected() {
        let response = protected_app()
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("authorization", "Bearer garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
