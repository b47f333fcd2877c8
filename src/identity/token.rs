use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Access-token claims. `login_date` pins the session to the KST calendar
/// day it was issued on, so downstream attendance features can tell a
/// fresh login from yesterday's token without another round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub phone: String,
    pub role: String,
    pub login_date: String,
    pub iat: i64,
    pub exp: i64,
}

/// `YYYY-MM-DD` in KST for an instant.
#[must_use]
pub fn kst_date_string(now: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(KST_OFFSET_SECS).expect("fixed KST offset");
    now.with_timezone(&offset).format("%Y-%m-%d").to_string()
}

/// Signs a 24-hour HS256 access token.
///
/// # Errors
/// Fails only when signing itself fails.
pub fn issue_access_token(
    secret: &SecretString,
    sub: &str,
    phone: &str,
    role: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let claims = Claims {
        sub: sub.to_string(),
        phone: phone.to_string(),
        role: role.to_string(),
        login_date: kst_date_string(now),
        iat: now.timestamp(),
        exp: now.timestamp() + ACCESS_TOKEN_TTL_SECS,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .context("signing access token")
}

/// Verifies the signature and expiry of an access token.
///
/// # Errors
/// Fails for a bad signature, an expired token or malformed claims.
pub fn decode_access_token(secret: &SecretString, token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .context("verifying access token")?;
    Ok(data.claims)
}
