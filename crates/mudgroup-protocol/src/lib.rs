//! Wire protocol for mudgroup.
//!
//! This crate defines the "language" group members speak:
//!
//! - **Messages** ([`Message`], [`MessageKind`], [`CharacterUpdate`]): the
//!   closed set of things that travel between host and peers.
//! - **Characters** ([`CharacterFields`] and friends): partial character
//!   state as carried by updates.
//! - **Versions** ([`ProtocolVersion`]): legacy vs. encrypted, and how the
//!   two sides settle on one.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become the
//!   payload of a frame.
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Engine (host / peer state machines)
//! ```

mod character;
mod codec;
mod error;
mod message;
mod version;

pub use character::{
    CharacterAffect, CharacterAffects, CharacterFields, CharacterPosition, RoomId,
};
pub use codec::{decode_message, encode_message, Codec, JsonCodec};
pub use error::ProtocolError;
pub use message::{CharacterUpdate, Message, MessageKind, WireMessage};
pub use version::ProtocolVersion;
