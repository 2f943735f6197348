use std::path::Path;

use chrono::Utc;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;
use crate::UserId;

/// Default lifetime of issued access tokens (24 hours).
pub const ACCESS_TOKEN_TTL_SECS: i64 = 86_400;

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// A configured shared secret wins over the key file, so every instance
/// behind a load balancer can verify the same tokens.
pub fn resolve_jwt_secret(
    configured: Option<&str>,
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match configured {
        Some(secret) if !secret.is_empty() => Ok(secret.as_bytes().to_vec()),
        _ => load_or_generate_jwt_secret(data_dir),
    }
}

/// Issue an HS256 access token for `user_id`.
pub fn issue_access_token(
    secret: &[u8],
    user_id: UserId,
    username: &str,
    ttl_secs: i64,
) -> Result<String, JwtError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id,
        username: username.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate an access token and return its claims.
pub fn validate_access_token(secret: &[u8], token: &str) -> Result<Claims, JwtError> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

/// Short client-facing reason for a rejected token.
pub fn describe_error(err: &JwtError) -> &'static str {
    match err.kind() {
        ErrorKind::ExpiredSignature => "token expired",
        _ => "token invalid",
    }
}
