//! Request identity: a `Claims` extractor over `Authorization: Bearer`.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::jwt;

/// Token claims attached to every authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Signing secret, injected into request extensions by a router layer so the
/// extractor can validate without reaching into AppState.
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Missing extension means the layer wasn't installed, not a bad token
        let JwtSecret(secret) = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        jwt::validate_access_token(secret, bearer).map_err(|_| StatusCode::UNAUTHORIZED)
    }
}
