//! Character fields as they travel on the wire.
//!
//! A [`CharacterFields`] is a *partial* character: every field is optional
//! and `None` means "unchanged". Full records live in the roster crate; this
//! module only describes what a message can carry.
//!
//! Older clients send fewer fields and sometimes names this version does
//! not know. Decoding is therefore lenient: missing fields become `None`,
//! an unknown position becomes [`CharacterPosition::Undefined`], and unknown
//! affects are dropped.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// RoomId
// ---------------------------------------------------------------------------

/// Map room a character stands in. `0` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u32);

impl RoomId {
    pub const UNKNOWN: Self = Self(0);

    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CharacterPosition
// ---------------------------------------------------------------------------

/// Body position reported by the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CharacterPosition {
    #[default]
    Undefined,
    Fighting,
    Standing,
    Sitting,
    Resting,
    Sleeping,
    Incapacitated,
    Dead,
}

impl CharacterPosition {
    pub const ALL: [Self; 8] = [
        Self::Undefined,
        Self::Fighting,
        Self::Standing,
        Self::Sitting,
        Self::Resting,
        Self::Sleeping,
        Self::Incapacitated,
        Self::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Fighting => "fighting",
            Self::Standing => "standing",
            Self::Sitting => "sitting",
            Self::Resting => "resting",
            Self::Sleeping => "sleeping",
            Self::Incapacitated => "incapacitated",
            Self::Dead => "dead",
        }
    }

    /// Parses a wire name; anything unrecognized is `Undefined`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
            .unwrap_or(Self::Undefined)
    }
}

impl fmt::Display for CharacterPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CharacterPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CharacterPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

// ---------------------------------------------------------------------------
// CharacterAffect / CharacterAffects
// ---------------------------------------------------------------------------

/// A status condition on a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacterAffect {
    Blind,
    Bashed,
    Slept,
    Poisoned,
    Bleeding,
    Hungry,
    Thirsty,
}

impl CharacterAffect {
    pub const ALL: [Self; 7] = [
        Self::Blind,
        Self::Bashed,
        Self::Slept,
        Self::Poisoned,
        Self::Bleeding,
        Self::Hungry,
        Self::Thirsty,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blind => "blind",
            Self::Bashed => "bashed",
            Self::Slept => "slept",
            Self::Poisoned => "poisoned",
            Self::Bleeding => "bleeding",
            Self::Hungry => "hungry",
            Self::Thirsty => "thirsty",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for CharacterAffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of affects currently on a character. Serialized as a list of
/// names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CharacterAffects(BTreeSet<CharacterAffect>);

impl CharacterAffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, affect: CharacterAffect) -> bool {
        self.0.contains(&affect)
    }

    /// Adds or removes `affect`. Returns `true` if the set changed.
    pub fn set(&mut self, affect: CharacterAffect, enabled: bool) -> bool {
        if enabled {
            self.0.insert(affect)
        } else {
            self.0.remove(&affect)
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CharacterAffect> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<CharacterAffect> for CharacterAffects {
    fn from_iter<I: IntoIterator<Item = CharacterAffect>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for CharacterAffects {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|a| a.as_str()))
    }
}

impl<'de> Deserialize<'de> for CharacterAffects {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        Ok(names
            .iter()
            .filter_map(|name| {
                let affect = CharacterAffect::from_name(name);
                if affect.is_none() {
                    tracing::debug!(name, "ignoring unknown affect");
                }
                affect
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// CharacterFields
// ---------------------------------------------------------------------------

/// A partial character as carried by `UpdateChar`, `AddChar`, and
/// `RemoveChar`.
///
/// Every field defaults to `None` when absent and is omitted from the
/// encoding when `None`, so an update only carries what changed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `#rrggbb`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxhp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mana: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxmana: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moves: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxmoves: Option<i32>,
    #[serde(rename = "state", skip_serializing_if = "Option::is_none")]
    pub position: Option<CharacterPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affects: Option<CharacterAffects>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prespam: Option<Vec<RoomId>>,
}

impl CharacterFields {
    /// Fields that only identify a character by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The name carried by this payload, or `""` if absent.
    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_unknown_name_is_undefined() {
        let pos: CharacterPosition = serde_json::from_str("\"levitating\"").unwrap();
        assert_eq!(pos, CharacterPosition::Undefined);
        let pos: CharacterPosition = serde_json::from_str("\"Resting\"").unwrap();
        assert_eq!(pos, CharacterPosition::Resting);
    }

    #[test]
    fn test_affects_unknown_names_are_dropped() {
        let affects: CharacterAffects =
            serde_json::from_str(r#"["blind", "cursed", "bashed"]"#).unwrap();
        assert!(affects.contains(CharacterAffect::Blind));
        assert!(affects.contains(CharacterAffect::Bashed));
        assert_eq!(affects.iter().count(), 2);
    }

    #[test]
    fn test_affects_set_reports_change() {
        let mut affects = CharacterAffects::new();
        assert!(affects.set(CharacterAffect::Poisoned, true));
        assert!(!affects.set(CharacterAffect::Poisoned, true));
        assert!(affects.set(CharacterAffect::Poisoned, false));
        assert!(affects.is_empty());
    }

    #[test]
    fn test_fields_omit_absent_values() {
        let fields = CharacterFields {
            hp: Some(10),
            ..CharacterFields::named("Gimli")
        };
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"name":"Gimli","hp":10}"#);
    }

    #[test]
    fn test_fields_missing_keys_decode_to_none() {
        let fields: CharacterFields = serde_json::from_str(r#"{"name":"Legolas"}"#).unwrap();
        assert_eq!(fields, CharacterFields::named("Legolas"));
        let empty: CharacterFields = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.name_or_empty(), "");
    }

    #[test]
    fn test_fields_position_uses_state_key() {
        let fields: CharacterFields =
            serde_json::from_str(r#"{"name":"Aragorn","state":"fighting","room":42}"#).unwrap();
        assert_eq!(fields.position, Some(CharacterPosition::Fighting));
        assert_eq!(fields.room, Some(RoomId(42)));
    }
}
