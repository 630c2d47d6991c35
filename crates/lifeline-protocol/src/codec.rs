//! Codec trait and the JSON implementation.
//!
//! The realtime manager is generic over a [`Codec`] so the frame format is
//! swappable without touching the state machine. The server speaks JSON,
//! so [`JsonCodec`] is the only implementation today.

use serde::{de::DeserializeOwned, Serialize};

use crate::{ClientEvent, ProtocolError, ServerEvent};

/// Converts values to frames and back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a frame.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a frame into a value.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Encodes an outbound event.
    fn encode_event(&self, event: &ClientEvent) -> Result<Vec<u8>, ProtocolError> {
        self.encode(event)
    }

    /// Parses an inbound frame into a server event.
    ///
    /// An unknown event name or a missing field is a
    /// [`ProtocolError::Decode`]; callers log and drop such frames.
    fn decode_event(&self, data: &[u8]) -> Result<ServerEvent, ProtocolError> {
        self.decode(data)
    }
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use lifeline_protocol::{ClientEvent, Codec, JsonCodec, MessageId};
///
/// let codec = JsonCodec;
/// let frame = codec
///     .encode_event(&ClientEvent::MarkRead { message_id: MessageId::new("m1") })
///     .unwrap();
/// assert_eq!(frame, br#"{"event":"mark_read","data":{"message_id":"m1"}}"#);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
