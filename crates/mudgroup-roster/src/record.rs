//! One group member's state.

use mudgroup_protocol::{CharacterAffects, CharacterFields, CharacterPosition, RoomId};

/// Default color for characters that never sent one.
const DEFAULT_COLOR: &str = "#ffffff";

/// The full, current state of one character.
///
/// Created when a character is first seen, updated in place from partial
/// [`CharacterFields`], and dropped when the character leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterRecord {
    pub name: String,
    pub label: String,
    pub color: String,
    pub position: CharacterPosition,
    pub affects: CharacterAffects,
    pub hp: i32,
    pub maxhp: i32,
    pub mana: i32,
    pub maxmana: i32,
    pub moves: i32,
    pub maxmoves: i32,
    pub room: RoomId,
    /// Rooms the character is predicted to walk through next.
    pub prespam: Vec<RoomId>,
}

impl CharacterRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: String::new(),
            color: DEFAULT_COLOR.to_string(),
            position: CharacterPosition::Undefined,
            affects: CharacterAffects::new(),
            hp: 0,
            maxhp: 0,
            mana: 0,
            maxmana: 0,
            moves: 0,
            maxmoves: 0,
            room: RoomId::UNKNOWN,
            prespam: Vec::new(),
        }
    }

    /// Builds a record from wire fields; absent fields keep their defaults.
    pub fn from_fields(fields: &CharacterFields) -> Self {
        let mut record = Self::new(fields.name_or_empty());
        record.apply(fields);
        record
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Applies every present field, then enforces `0 <= value <= max`.
    ///
    /// Returns `true` only if at least one stored value changed. Never
    /// fails: out-of-range numbers are clamped and logged.
    pub fn apply(&mut self, fields: &CharacterFields) -> bool {
        let before = self.clone();

        if let Some(name) = &fields.name {
            self.name.clone_from(name);
        }
        if let Some(label) = &fields.label {
            self.label.clone_from(label);
        }
        if let Some(color) = &fields.color {
            self.color.clone_from(color);
        }
        if let Some(position) = fields.position {
            self.position = position;
        }
        if let Some(affects) = &fields.affects {
            self.affects.clone_from(affects);
        }
        if let Some(room) = fields.room {
            self.room = room;
        }
        if let Some(prespam) = &fields.prespam {
            self.prespam.clone_from(prespam);
        }

        let name = self.name.clone();
        clamp_pair(&name, "hp", &mut self.hp, fields.hp, "maxhp", &mut self.maxhp, fields.maxhp);
        clamp_pair(
            &name,
            "mana",
            &mut self.mana,
            fields.mana,
            "maxmana",
            &mut self.maxmana,
            fields.maxmana,
        );
        clamp_pair(
            &name,
            "moves",
            &mut self.moves,
            fields.moves,
            "maxmoves",
            &mut self.maxmoves,
            fields.maxmoves,
        );

        *self != before
    }

    /// The full record as wire fields.
    pub fn to_fields(&self) -> CharacterFields {
        CharacterFields {
            name: Some(self.name.clone()),
            label: Some(self.label.clone()),
            color: Some(self.color.clone()),
            hp: Some(self.hp),
            maxhp: Some(self.maxhp),
            mana: Some(self.mana),
            maxmana: Some(self.maxmana),
            moves: Some(self.moves),
            maxmoves: Some(self.maxmoves),
            position: Some(self.position),
            affects: Some(self.affects.clone()),
            room: Some(self.room),
            prespam: Some(self.prespam.clone()),
        }
    }
}

/// Stores the new value/max pair and clamps it into range.
fn clamp_pair(
    who: &str,
    value_name: &str,
    value: &mut i32,
    new_value: Option<i32>,
    max_name: &str,
    max: &mut i32,
    new_max: Option<i32>,
) {
    if let Some(v) = new_value {
        *value = v;
    }
    if let Some(m) = new_max {
        *max = m;
    }
    if *max < 0 {
        tracing::warn!(character = who, max_name, max = *max, "negative maximum raised to 0");
        *max = 0;
    }
    if *value < 0 {
        tracing::warn!(character = who, value_name, value = *value, "negative value raised to 0");
        *value = 0;
    }
    if *value > *max {
        tracing::warn!(
            character = who,
            value_name,
            value = *value,
            max = *max,
            "value clamped to maximum"
        );
        *value = *max;
    }
}
