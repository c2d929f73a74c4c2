//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The engines do not care HOW messages are serialized, they only need
//! something that implements the [`Codec`] trait.
//!
//! [`encode_message`] and [`decode_message`] are the entry points the
//! engines use: they go through [`WireMessage`] so that an unknown kind
//! surfaces as [`ProtocolError::UnknownKind`] instead of a generic decode
//! failure.

use serde::{de::DeserializeOwned, Serialize};

use crate::{Message, ProtocolError, WireMessage};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → safe to share between the engine task and the
///   connection tasks.
/// - `'static` → the codec owns everything it needs, so it can live
///   inside long-running async tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use mudgroup_protocol::{decode_message, encode_message, JsonCodec, Message};
///
/// let codec = JsonCodec;
/// let msg = Message::GroupTell { from: "Bilbo".into(), text: "hello".into() };
///
/// let bytes = encode_message(&codec, &msg).unwrap();
/// assert_eq!(decode_message(&codec, &bytes).unwrap(), msg);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

/// Encodes a typed message into one frame payload.
pub fn encode_message<C: Codec>(codec: &C, message: &Message) -> Result<Vec<u8>, ProtocolError> {
    codec.encode(&message.to_wire()?)
}

/// Decodes one frame payload into a typed message.
pub fn decode_message<C: Codec>(codec: &C, data: &[u8]) -> Result<Message, ProtocolError> {
    let wire: WireMessage = codec.decode(data)?;
    Message::from_wire(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_malformed_json_fails() {
        let err = decode_message(&JsonCodec, b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_decode_message_missing_data_section_is_empty() {
        let msg = decode_message(&JsonCodec, br#"{"message":1}"#).unwrap();
        assert_eq!(msg, Message::Ack);
    }

    #[test]
    fn test_encode_message_writes_kind_and_data() {
        let bytes = encode_message(&JsonCodec, &Message::RequestInfo).unwrap();
        assert_eq!(bytes, br#"{"message":5,"data":{}}"#.to_vec());
    }
}
