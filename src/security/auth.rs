//! JWT bearer token verification and role checks.
//!
//! # Responsibilities
//! - Extract the token from `Authorization: Bearer <jwt>`
//! - Verify signature and expiry (HS256, shared secret)
//! - Build a per-request AuthContext from the claims
//! - Enforce per-route role requirements
//!
//! # Design Decisions
//! - Tokens are issued by the user service (24 h validity); the gateway
//!   only verifies and never re-derives claims
//! - Empty or missing role claims default to `["user"]`
//! - Zero clock leeway: a token is expired the second `exp` passes

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by tokens from the user service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated request context. Lives for one request, never persisted.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authorization header missing or malformed")]
    TokenMissing,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Insufficient permissions")]
    InsufficientRole,
}

/// Verifies bearer tokens against the shared HS256 secret.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate the `Authorization` header and build an AuthContext.
    pub fn authenticate(&self, header: Option<&str>) -> Result<AuthContext, AuthError> {
        let token = bearer_token(header)?;
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |error| match error.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            },
        )?;

        let claims = data.claims;
        let roles = if claims.roles.is_empty() {
            vec!["user".to_string()]
        } else {
            claims.roles
        };

        Ok(AuthContext {
            user_id: claims.user_id,
            email: claims.email,
            roles,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    /// Check that the context carries at least one of the required roles.
    pub fn authorize(&self, context: &AuthContext, required: &[&str]) -> Result<(), AuthError> {
        if required.iter().any(|role| context.has_role(role)) {
            Ok(())
        } else {
            Err(AuthError::InsufficientRole)
        }
    }
}

/// Extract the token from `Authorization: Bearer <jwt>`. The scheme is
/// matched case-insensitively.
fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::TokenMissing)?;
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthError::TokenMissing),
    }
}
