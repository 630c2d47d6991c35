//! Request and response bodies of the credential and profile endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Credentials exchanged for a token at the issuing endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// The part of the email before `@`, used as a display name when no
    /// profile is available.
    pub fn email_local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"******")
            .finish()
    }
}

/// Body returned by the issuing and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

impl TokenResponse {
    /// Parses and validates a token response body.
    ///
    /// # Errors
    /// [`ProtocolError::Decode`] if the body is not the expected JSON, and
    /// [`ProtocolError::InvalidMessage`] if the token is empty.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let parsed: Self =
            serde_json::from_slice(body).map_err(ProtocolError::Decode)?;
        if parsed.access_token.trim().is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "access_token is empty".into(),
            ));
        }
        Ok(parsed)
    }
}

/// Profile document returned by the profile endpoints.
///
/// Every field is optional: the session layer merges whatever is present
/// and keeps its own values for the rest. Fields this crate does not know
/// about are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub joined_at: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileDocument {
    /// Parses a profile body.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(ProtocolError::Decode)
    }

    /// Account creation time; older servers call it `joined_at`.
    pub fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref().or(self.joined_at.as_deref())
    }
}

/// Error body shape shared by the HTTP endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, alias = "message")]
    pub msg: Option<String>,
}

impl ErrorBody {
    /// Extracts the server-supplied message, if the body carries one.
    ///
    /// Never fails: a body that is not an error object simply has no
    /// message.
    pub fn message_from(body: &[u8]) -> Option<String> {
        serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.msg)
            .filter(|m| !m.trim().is_empty())
    }
}
