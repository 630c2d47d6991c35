//! Unified error type for Lifeline.

use lifeline_http::HttpError;
use lifeline_protocol::ProtocolError;
use lifeline_realtime::RealtimeError;
use lifeline_session::{SessionError, StoreError};
use lifeline_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum LifelineError {
    /// Login, refresh or session state.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The credential store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The realtime channel.
    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    /// A request through the retry coordinator.
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl LifelineError {
    /// Whether the user has to log in again.
    pub fn is_session_terminal(&self) -> bool {
        match self {
            Self::Session(e) => e.is_session_terminal(),
            Self::Http(e) => e.is_session_terminal(),
            _ => false,
        }
    }
}
