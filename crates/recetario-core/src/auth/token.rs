//! Client-side JWT inspection.
//!
//! Tokens are decoded WITHOUT signature verification. The result is
//! advisory: it only decides when to refresh proactively. The backend
//! re-verifies every token it receives.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Default window before expiry in which a token is renewed proactively.
pub const DEFAULT_NEAR_EXPIRY_SECS: i64 = 600;

/// Claims we care about from the token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Expiry as unix seconds
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    /// User id the backend signed into the token
    #[serde(default)]
    pub id: Option<String>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Decode the payload segment of a JWT. Returns `None` for anything that is
/// not three dot-separated segments with a base64 JSON payload.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() || payload.is_empty() {
        return None;
    }

    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode_claims(token) {
        Some(claims) => claims.exp <= now.timestamp(),
        None => true,
    }
}

pub fn is_near_expiry(token: &str, threshold: Duration) -> bool {
    is_near_expiry_at(token, threshold, Utc::now())
}

pub fn is_near_expiry_at(token: &str, threshold: Duration, now: DateTime<Utc>) -> bool {
    match decode_claims(token) {
        Some(claims) => claims.exp - now.timestamp() < threshold.num_seconds(),
        None => true,
    }
}

/// Time remaining before the token expires (negative once expired).
pub fn expires_in(token: &str) -> Option<Duration> {
    let claims = decode_claims(token)?;
    Some(Duration::seconds(claims.exp - Utc::now().timestamp()))
}
