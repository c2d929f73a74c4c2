//! Error types for the protocol layer.
//!
//! When you see a `ProtocolError`, the problem is in turning bytes into a
//! [`Message`](crate::Message) or back, not in networking or the roster.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON or a missing envelope.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The envelope named a message kind this version does not know.
    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    /// The envelope was fine but the data section has the wrong shape,
    /// e.g. a number where a name was expected.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
