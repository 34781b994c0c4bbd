//! Authentication service.
//!
//! Validates operator JWT access tokens issued by the calendar's auth
//! component. Tokens are HS256-signed with the shared `JWT_SECRET`.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Email
    pub email: String,
    /// Is admin
    pub is_admin: bool,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Token type: "access" or "refresh"
    pub token_type: String,
}

/// Authentication service
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }

    /// Issue an access token. Used by tooling and tests; the calendar's auth
    /// component issues the tokens operators normally present.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        is_admin: bool,
        ttl: Duration,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            is_admin,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type: "access".to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| AppError::Authentication(format!("Invalid token: {}", e)))?;

        if token_data.claims.token_type != "access" {
            return Err(AppError::Authentication("Invalid token type".to_string()));
        }

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_round_trip() {
        let service = AuthService::new("test-secret");
        let user = Uuid::new_v4();
        let token = service
            .generate_access_token(user, "admin@example.com", true, Duration::minutes(5))
            .unwrap();

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert!(claims.is_admin);
    }

    #[test]
    fn test_rejects_token_signed_with_other_secret() {
        let issuer = AuthService::new("secret-a");
        let verifier = AuthService::new("secret-b");
        let token = issuer
            .generate_access_token(Uuid::new_v4(), "a@example.com", true, Duration::minutes(5))
            .unwrap();

        assert!(matches!(
            verifier.validate_access_token(&token),
            Err(AppError::Authentication(_))
        ));
    }

    #[test]
    fn test_rejects_expired_token() {
        let service = AuthService::new("test-secret");
        let token = service
            .generate_access_token(Uuid::new_v4(), "a@example.com", true, Duration::hours(-2))
            .unwrap();
        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_rejects_refresh_token() {
        let service = AuthService::new("test-secret");
        let now = Utc::now();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "a@example.com".into(),
            is_admin: true,
            iat: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
            token_type: "refresh".into(),
        };
        let token = encode(&Header::default(), &claims, &service.encoding_key).unwrap();
        assert!(service.validate_access_token(&token).is_err());
    }
}
