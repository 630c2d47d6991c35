use std::time::Duration;

use lifeline_protocol::ProtocolError;
use lifeline_transport::TransportError;

/// Errors from the realtime channel.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// Dialing or using the underlying connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No endpoint answered within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The configuration lists no endpoints to dial.
    #[error("no realtime endpoints configured")]
    NoEndpoints,

    /// Every automatic reconnect attempt failed.
    #[error("gave up after {attempts} failed connect attempts")]
    AttemptsExhausted { attempts: u32 },

    /// An outbound event was refused because the channel is not
    /// authenticated.
    #[error("realtime channel is not authenticated")]
    NotAuthenticated,

    /// Writing an outbound event failed; the connection has been dropped.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The connection actor has shut down.
    #[error("realtime connection manager is no longer running")]
    Closed,
}
