//! Error types for the request layer.

use crate::NetworkNotice;

/// Errors surfaced by [`RequestRetryCoordinator`](crate::RequestRetryCoordinator).
///
/// By the time a caller sees one of these, the coordinator has already
/// spent its one refresh and its one network retry on the request.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The server rejected the credential and it could not be refreshed,
    /// or there was no credential to begin with. The caller must log in
    /// again.
    #[error("session expired")]
    SessionExpired,

    /// The server answered with a non-success status. `message` is the
    /// user-facing text: the server's own message when it sent one,
    /// otherwise one derived from the status.
    #[error("{message} (status {status})")]
    Status { status: u16, message: String },

    /// No usable response arrived.
    #[error("{notice}: {source}")]
    Network {
        notice: NetworkNotice,
        #[source]
        source: reqwest::Error,
    },

    /// The request could not be built (bad URL, bad MIME type).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A success body did not match the expected shape.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl HttpError {
    /// Whether this error means the session is gone and the user must
    /// log in again.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Whether the server reported a 5xx. These are never retried
    /// automatically.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status >= 500)
    }

    /// The response status, when the failure came with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::SessionExpired => Some(401),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_session_terminal_only_for_session_expired() {
        assert!(HttpError::SessionExpired.is_session_terminal());
        let forbidden = HttpError::Status {
            status: 403,
            message: "permission denied".into(),
        };
        assert!(!forbidden.is_session_terminal());
    }

    #[test]
    fn test_is_server_error_for_5xx_status() {
        let err = HttpError::Status {
            status: 502,
            message: "bad gateway".into(),
        };
        assert!(err.is_server_error());
        assert_eq!(err.status(), Some(502));
        assert!(!HttpError::InvalidRequest("x".into()).is_server_error());
    }
}
