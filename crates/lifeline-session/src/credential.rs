//! The bearer token and its decoded claims.
//!
//! A [`Credential`] can only be built through [`Credential::parse`], so a
//! value of this type always has a well-formed claims block. The signature
//! is never checked here: the server is the authority on validity, the
//! client only needs the subject and the expiry to schedule refreshes.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use lifeline_protocol::UserId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::SessionError;

/// Current wall-clock time as whole seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decoded payload of a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id the token was issued for.
    #[serde(deserialize_with = "string_or_number")]
    pub sub: String,

    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,

    /// Server-asserted role, when the issuer includes one.
    #[serde(default)]
    pub role: Option<String>,

    /// Every other claim, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Issuers disagree on whether `sub` is a string or a number.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for sub, got {other}"
        ))),
    }
}

/// A bearer token together with its decoded claims.
#[derive(Clone, PartialEq)]
pub struct Credential {
    raw: String,
    claims: Claims,
}

impl Credential {
    /// Decodes the claims block (the second dot-separated segment, URL-safe
    /// base64 JSON) of `raw`.
    ///
    /// # Errors
    /// [`SessionError::MalformedToken`] if the token does not have three
    /// segments, the payload is not base64, or the JSON lacks `sub`/`exp`.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        let mut segments = raw.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(SessionError::MalformedToken(
                "expected three dot-separated segments".into(),
            ));
        };

        // Some encoders keep the `=` padding; the no-pad engine rejects it.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| SessionError::MalformedToken(e.to_string()))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::MalformedToken(e.to_string()))?;

        if claims.sub.is_empty() {
            return Err(SessionError::MalformedToken("empty subject".into()));
        }

        Ok(Self {
            raw: raw.to_string(),
            claims,
        })
    }

    /// The token as sent in the `Authorization` header.
    pub fn bearer(&self) -> &str {
        &self.raw
    }

    /// The decoded claims.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The user this token was issued for.
    pub fn subject(&self) -> UserId {
        UserId::new(self.claims.sub.clone())
    }

    /// Expiry, seconds since the Unix epoch.
    pub fn expires_at(&self) -> u64 {
        self.claims.exp
    }

    /// Seconds left until expiry at `now`; zero or negative once expired.
    pub fn seconds_remaining(&self, now: u64) -> i64 {
        self.claims.exp as i64 - now as i64
    }

    /// Whether the token is expired at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.seconds_remaining(now) <= 0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.raw.chars().take(8).collect();
        f.debug_struct("Credential")
            .field("token", &format_args!("{shown}…"))
            .field("sub", &self.claims.sub)
            .field("exp", &self.claims.exp)
            .finish()
    }
}
