//! Access token inspection.
//!
//! The client never verifies token signatures; that is the backend's job.
//! It only reads the payload to plan refreshes against the `exp` claim.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Claims read from an access token payload.
#[derive(Debug, Deserialize)]
struct PayloadClaims {
    /// Expiration time (Unix timestamp, fractional seconds allowed)
    #[serde(deserialize_with = "numeric_date")]
    exp: u64,
    /// Subject (the backend puts the user's email here)
    #[serde(default)]
    sub: Option<String>,
}

/// A NumericDate may carry fractional seconds; they are dropped.
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(serde::de::Error::custom("exp is not a valid NumericDate"));
    }
    Ok(value.floor() as u64)
}

/// Claims derived from the current access token. Never cached: the token
/// they came from is replaced on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedClaims {
    /// Absolute expiry, seconds since the Unix epoch.
    pub expires_at: u64,
    pub subject: Option<String>,
}

impl DecodedClaims {
    /// True if the token expires at or before `now + buffer`.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.expires_within_at(buffer, jsonwebtoken::get_current_timestamp())
    }

    fn expires_within_at(&self, buffer: Duration, now: u64) -> bool {
        self.expires_at <= now.saturating_add(buffer.as_secs())
    }

    /// Time left until expiry, zero if already expired.
    pub fn remaining(&self) -> Duration {
        let now = jsonwebtoken::get_current_timestamp();
        Duration::from_secs(self.expires_at.saturating_sub(now))
    }
}

/// Decode an access token's claims without checking its signature or expiry.
pub fn decode(token: &str) -> Result<DecodedClaims, JwtError> {
    // Any algorithm goes: nothing here checks the signature.
    let token_data = jsonwebtoken::dangerous::insecure_decode::<PayloadClaims>(token)
        .map_err(JwtError::Malformed)?;

    Ok(DecodedClaims {
        expires_at: token_data.claims.exp,
        subject: token_data.claims.sub,
    })
}

/// Fail-closed expiry check: a token that cannot be decoded counts as expiring.
pub fn is_expiring_within(token: &str, buffer: Duration) -> bool {
    match decode(token) {
        Ok(claims) => claims.expires_within(buffer),
        Err(_) => true,
    }
}

/// Time left before the token expires, None if it cannot be decoded.
pub fn remaining(token: &str) -> Option<Duration> {
    decode(token).ok().map(|claims| claims.remaining())
}

/// Errors that can occur while inspecting a token.
#[derive(Debug)]
pub enum JwtError {
    /// The token is not a JWT with a numeric `exp` claim
    Malformed(jsonwebtoken::errors::Error),
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Malformed(e) => write!(f, "Malformed access token: {}", e),
        }
    }
}

impl std::error::Error for JwtError {}
