/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be reached or refused the upgrade.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The endpoint string is not something this dialer understands.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),
}

impl TransportError {
    /// Shorthand for a refused connection with a message.
    pub fn refused(message: impl Into<String>) -> Self {
        Self::ConnectFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            message.into(),
        ))
    }
}
