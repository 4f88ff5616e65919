//! HS256 token signing and validation.
//!
//! This server only validates tokens; issuance lives in the identity
//! service. `sign_access_token` exists for that service's benefit and for
//! tests that need to authenticate against a local instance.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Access token lifetime in seconds (15 minutes).
const ACCESS_TOKEN_TTL_SECS: i64 = 900;

const SECRET_LEN: usize = 32;

/// Load the signing secret from `data_dir/jwt_secret`, generating a fresh
/// 256-bit random one when the file is missing or malformed.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    match std::fs::read(&key_path) {
        Ok(key) if key.len() == SECRET_LEN => {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        Ok(key) => {
            tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
        }
        Err(_) => {}
    }

    let key: [u8; SECRET_LEN] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

pub fn sign_access_token(
    secret: &[u8],
    user_id: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ACCESS_TOKEN_TTL_SECS,
    };
    // Header::default() is HS256
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_validate_roundtrip() {
        let secret = [7u8; 32];
        let token = sign_access_token(&secret, "user-1").unwrap();
        let claims = validate_access_token(&secret, &token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = sign_access_token(&[7u8; 32], "user-1").unwrap();
        assert!(validate_access_token(&[8u8; 32], &token).is_err());
    }
}
