use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::Role;

const TOKEN_VALIDITY_HOURS: i64 = 24;

/// Claims embedded in the bearer token handed out at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: i64,
    pub username: String,
    pub role: String,
    pub school_id: Option<i64>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

fn secret_key() -> Vec<u8> {
    std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "insecure-dev-secret".to_string())
        .into_bytes()
}

pub fn issue_token(
    user_id: i64,
    username: &str,
    role: Role,
    school_id: Option<i64>,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role: role.to_string(),
        school_id,
        iat: now.timestamp(),
        exp: (now + Duration::hours(TOKEN_VALIDITY_HOURS)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&secret_key()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

pub fn verify_token(token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(&secret_key()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Authentication("Invalid token".to_string()))
}
