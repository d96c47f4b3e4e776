//! Client-side token codec. Decodes the payload segment of the bearer token
//! for expiry tracking and role display only; the signature is the backend's
//! business and is never verified here.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Closed role set issued by the backend. Anything else fails decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Courier,
    Customer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "ADMIN"),
            Role::Courier => write!(f, "COURIER"),
            Role::Customer => write!(f, "CUSTOMER"),
        }
    }
}

/// Decoded token claims. `exp`/`iat` are unix seconds as issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|s| Utc.timestamp_opt(s, 0).single())
    }

    /// Wall-clock expiry check, no leeway.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }
}

/// The externally-issued bearer token together with its decoded claims.
/// Replaced wholesale on every refresh, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub claims: Claims,
}

impl Credential {
    pub fn is_expired(&self) -> bool { self.claims.is_expired() }
}

/// Decode a bearer token into claims. Returns `None` on any malformed input
/// (wrong segment count, bad base64, bad JSON, unknown role) — callers treat
/// `None` as "not authenticated".
pub fn decode(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice::<Claims>(&raw).ok()
}

/// Expiry check on the raw token; decode failure counts as expired.
pub fn token_expired(token: &str) -> bool {
    decode(token).map(|c| c.is_expired()).unwrap_or(true)
}
