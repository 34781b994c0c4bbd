//! Authentication middleware.
//!
//! Extracts and validates `Authorization: Bearer <jwt>` access tokens.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::services::auth_service::{AuthService, Claims};

/// Extension that holds authenticated user information
#[derive(Debug, Clone)]
pub struct AuthExtension {
    pub user_id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

impl From<Claims> for AuthExtension {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            is_admin: claims.is_admin,
        }
    }
}

/// Token extraction result
#[derive(Debug)]
enum ExtractedToken<'a> {
    Bearer(&'a str),
    None,
    Invalid,
}

fn extract_token(request: &Request) -> ExtractedToken<'_> {
    match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        Some(header) => match header.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => ExtractedToken::Bearer(token.trim()),
            _ => ExtractedToken::Invalid,
        },
        None => ExtractedToken::None,
    }
}

/// Admin-only middleware - requires authenticated admin user
pub async fn admin_middleware(
    State(auth_service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_ext = match extract_token(&request) {
        ExtractedToken::Bearer(token) => match auth_service.validate_access_token(token) {
            Ok(claims) => AuthExtension::from(claims),
            Err(_) => {
                return (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response()
            }
        },
        ExtractedToken::None => {
            return (StatusCode::UNAUTHORIZED, "Missing authorization header").into_response();
        }
        ExtractedToken::Invalid => {
            return (StatusCode::UNAUTHORIZED, "Invalid authorization header format")
                .into_response();
        }
    };

    if !auth_ext.is_admin {
        tracing::warn!(user_id = %auth_ext.user_id, "Non-admin attempted backup administration");
        return (StatusCode::FORBIDDEN, "Admin access required").into_response();
    }

    request.extensions_mut().insert(auth_ext);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(header: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/v1/backups/list");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_bearer_token() {
        let request = request_with(Some("Bearer abc.def.ghi"));
        assert!(matches!(extract_token(&request), ExtractedToken::Bearer("abc.def.ghi")));
    }

    #[test]
    fn test_extract_missing_and_malformed() {
        assert!(matches!(extract_token(&request_with(None)), ExtractedToken::None));
        assert!(matches!(
            extract_token(&request_with(Some("Basic dXNlcjpwYXNz"))),
            ExtractedToken::Invalid
        ));
        assert!(matches!(
            extract_token(&request_with(Some("Bearer "))),
            ExtractedToken::Invalid
        ));
    }
}
