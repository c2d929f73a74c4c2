//! The closed set of group messages.
//!
//! On the wire every message is an object with an integer kind and a
//! kind-specific data section:
//!
//! ```json
//! {"message": 12, "data": {"playerData": {"name": "Gandalf", "hp": 41}}}
//! ```
//!
//! In Rust each kind is one variant of [`Message`] with a strongly typed
//! payload. [`WireMessage`] is the untyped intermediate form; conversion in
//! both directions goes through it so that the typed payloads never have
//! to know about the integer tag.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CharacterFields, ProtocolError, ProtocolVersion};

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The integer tag identifying a message. The numbers are part of the wire
/// format and must never change. `0` and `6` are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Ack = 1,
    Handshake = 2,
    RequestAck = 3,
    RequestLogin = 4,
    RequestInfo = 5,
    GroupTell = 7,
    StateLoggedIn = 8,
    StateKicked = 9,
    AddChar = 10,
    RemoveChar = 11,
    UpdateChar = 12,
    RenameChar = 13,
}

impl MessageKind {
    pub const ALL: [Self; 12] = [
        Self::Ack,
        Self::Handshake,
        Self::RequestAck,
        Self::RequestLogin,
        Self::RequestInfo,
        Self::GroupTell,
        Self::StateLoggedIn,
        Self::StateKicked,
        Self::AddChar,
        Self::RemoveChar,
        Self::UpdateChar,
        Self::RenameChar,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A character update, optionally wrapped as a login.
///
/// A login is the first `UpdateChar` a peer sends. On the legacy protocol
/// it is also the handshake, which is why the wrapper carries a version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CharacterUpdate {
    /// `Some` when this update is a login.
    pub login: Option<ProtocolVersion>,
    pub player: CharacterFields,
}

impl CharacterUpdate {
    pub fn update(player: CharacterFields) -> Self {
        Self {
            login: None,
            player,
        }
    }

    pub fn login(version: ProtocolVersion, player: CharacterFields) -> Self {
        Self {
            login: Some(version),
            player,
        }
    }
}

/// One group protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Host: "this is the highest version I speak".
    /// Peer: "this is the version I picked".
    Handshake { protocol_version: ProtocolVersion },
    UpdateChar(CharacterUpdate),
    AddChar(CharacterFields),
    RemoveChar(CharacterFields),
    RenameChar { old_name: String, new_name: String },
    GroupTell { from: String, text: String },
    Ack,
    RequestAck,
    RequestInfo,
    /// Host: "start TLS, then log in".
    RequestLogin,
    StateLoggedIn,
    StateKicked { reason: String },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Handshake { .. } => MessageKind::Handshake,
            Self::UpdateChar(_) => MessageKind::UpdateChar,
            Self::AddChar(_) => MessageKind::AddChar,
            Self::RemoveChar(_) => MessageKind::RemoveChar,
            Self::RenameChar { .. } => MessageKind::RenameChar,
            Self::GroupTell { .. } => MessageKind::GroupTell,
            Self::Ack => MessageKind::Ack,
            Self::RequestAck => MessageKind::RequestAck,
            Self::RequestInfo => MessageKind::RequestInfo,
            Self::RequestLogin => MessageKind::RequestLogin,
            Self::StateLoggedIn => MessageKind::StateLoggedIn,
            Self::StateKicked { .. } => MessageKind::StateKicked,
        }
    }

    /// Converts to the untyped wire form.
    pub fn to_wire(&self) -> Result<WireMessage, ProtocolError> {
        let data = match self {
            Self::Handshake { protocol_version } => to_value(&HandshakeData {
                protocol_version: *protocol_version,
            })?,
            Self::UpdateChar(update) => match update.login {
                Some(protocol_version) => to_value(&LoginUpdateData {
                    login: LoginData {
                        protocol_version,
                        player: update.player.clone(),
                    },
                })?,
                None => to_value(&PlayerData {
                    player: update.player.clone(),
                })?,
            },
            Self::AddChar(player) | Self::RemoveChar(player) => to_value(&PlayerData {
                player: player.clone(),
            })?,
            Self::RenameChar { old_name, new_name } => to_value(&RenameData {
                old_name: old_name.clone(),
                new_name: new_name.clone(),
            })?,
            Self::GroupTell { from, text } => to_value(&TellData {
                from: from.clone(),
                text: text.clone(),
            })?,
            Self::StateKicked { reason } => to_value(&KickData {
                reason: reason.clone(),
            })?,
            Self::Ack
            | Self::RequestAck
            | Self::RequestInfo
            | Self::RequestLogin
            | Self::StateLoggedIn => Value::Object(serde_json::Map::new()),
        };
        Ok(WireMessage {
            message: self.kind().code(),
            data,
        })
    }

    /// Converts from the untyped wire form.
    ///
    /// A `null` or missing data section is treated as empty, and missing
    /// fields take their documented defaults.
    pub fn from_wire(wire: WireMessage) -> Result<Self, ProtocolError> {
        let kind = MessageKind::from_code(wire.message)
            .ok_or(ProtocolError::UnknownKind(wire.message))?;
        let data = match wire.data {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        let message = match kind {
            MessageKind::Handshake => {
                let d: HandshakeData = from_value(kind, data)?;
                Self::Handshake {
                    protocol_version: d.protocol_version,
                }
            }
            MessageKind::UpdateChar => {
                let d: UpdateData = from_value(kind, data)?;
                match d.login {
                    Some(login) => Self::UpdateChar(CharacterUpdate::login(
                        login.protocol_version,
                        login.player,
                    )),
                    None => Self::UpdateChar(CharacterUpdate::update(d.player)),
                }
            }
            MessageKind::AddChar => Self::AddChar(from_value::<PlayerData>(kind, data)?.player),
            MessageKind::RemoveChar => {
                Self::RemoveChar(from_value::<PlayerData>(kind, data)?.player)
            }
            MessageKind::RenameChar => {
                let d: RenameData = from_value(kind, data)?;
                Self::RenameChar {
                    old_name: d.old_name,
                    new_name: d.new_name,
                }
            }
            MessageKind::GroupTell => {
                let d: TellData = from_value(kind, data)?;
                Self::GroupTell {
                    from: d.from,
                    text: d.text,
                }
            }
            MessageKind::StateKicked => {
                let d: KickData = from_value(kind, data)?;
                Self::StateKicked { reason: d.reason }
            }
            MessageKind::Ack => Self::Ack,
            MessageKind::RequestAck => Self::RequestAck,
            MessageKind::RequestInfo => Self::RequestInfo,
            MessageKind::RequestLogin => Self::RequestLogin,
            MessageKind::StateLoggedIn => Self::StateLoggedIn,
        };
        Ok(message)
    }
}

/// The untyped wire form: integer kind plus free-form data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub message: u32,
    #[serde(default)]
    pub data: Value,
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(ProtocolError::Encode)
}

fn from_value<T: DeserializeOwned>(kind: MessageKind, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidMessage(format!("{kind}: {e}")))
}

// ---------------------------------------------------------------------------
// Per-kind data sections
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct HandshakeData {
    protocol_version: ProtocolVersion,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct PlayerData {
    #[serde(rename = "playerData")]
    player: CharacterFields,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct LoginData {
    protocol_version: ProtocolVersion,
    #[serde(rename = "playerData")]
    player: CharacterFields,
}

#[derive(Serialize)]
struct LoginUpdateData {
    #[serde(rename = "loginData")]
    login: LoginData,
}

/// Decoding view of `UpdateChar`: either wrapper may be present.
#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdateData {
    #[serde(rename = "loginData")]
    login: Option<LoginData>,
    #[serde(rename = "playerData")]
    player: CharacterFields,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct RenameData {
    #[serde(rename = "oldname")]
    old_name: String,
    #[serde(rename = "newname")]
    new_name: String,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct TellData {
    from: String,
    text: String,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct KickData {
    reason: String,
}
