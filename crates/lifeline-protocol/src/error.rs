//! Error types for the protocol layer.

/// Errors that can occur while encoding or parsing a payload.
///
/// A `ProtocolError` always means the bytes themselves were wrong; it says
/// nothing about the network or about authentication.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The bytes are not valid JSON, or do not match the expected shape
    /// (missing field, wrong type, unknown event name).
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The payload parsed but violates a protocol rule, e.g. an empty
    /// access token.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
