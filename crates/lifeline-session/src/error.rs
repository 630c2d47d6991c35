//! Error types for the session layer.

use lifeline_protocol::ProtocolError;

/// Errors from the credential lifecycle.
///
/// `InvalidCredentials` is the only variant a user can fix by typing
/// something different; `SessionExpired` and `RefreshFailed` both mean the
/// session is gone and a fresh login is required.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The issuing endpoint rejected the email/password pair.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The stored token is past its expiry, or the server no longer
    /// accepts it.
    #[error("session expired")]
    SessionExpired,

    /// The token was close to expiry and the refresh call failed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// There is no session to act on.
    #[error("no active session")]
    NoSession,

    /// A token whose claims block could not be decoded.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The credential endpoints could not be used.
    #[error(transparent)]
    Api(#[from] AuthApiError),

    /// The credential store failed to read or write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Whether this error means the user must log in again.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired | Self::RefreshFailed(_) | Self::NoSession
        )
    }
}

/// Errors returned by an [`AuthApi`](crate::AuthApi) implementation.
#[derive(Debug, thiserror::Error)]
pub enum AuthApiError {
    /// The endpoint answered with an authentication failure
    /// (401, or 400/403 for a bad login body).
    #[error("rejected with status {status}: {}", message.as_deref().unwrap_or("no message"))]
    Rejected { status: u16, message: Option<String> },

    /// The endpoint does not exist on this server.
    #[error("endpoint not found")]
    NotFound,

    /// The endpoint could not be reached or answered with a server error.
    #[error("credential endpoint unavailable: {0}")]
    Unavailable(String),

    /// The endpoint answered but the body did not parse.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
}

/// Errors from a [`CredentialStore`](crate::CredentialStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file exists but is not a valid store document.
    #[error("credential store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A background write of the backing file failed.
    #[error("credential store write failed: {0}")]
    WriteFailed(String),
}
