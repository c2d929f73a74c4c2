//! Deferred roster mutations.

use mudgroup_protocol::CharacterFields;

use crate::{CharacterRecord, RosterError};

/// A mutation that can be applied now or replayed later.
///
/// Each variant owns exactly what it needs, so a queued command does not
/// borrow from whoever submitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterCommand {
    /// Add a new character. Fails on an empty or taken name.
    Add(CharacterRecord),
    /// Remove a character by name. No-op if absent; self is refused.
    Remove(String),
    /// Apply partial fields to the character they name.
    Update(CharacterFields),
    /// Update the named character, or add it if absent. Decided when the
    /// command runs, not when it is submitted.
    Upsert(CharacterFields),
    /// Rename a character. No-op if `old` is absent.
    Rename { old: String, new: String },
    /// Drop every character except self.
    ResetAll,
}

/// What an applied command changed. Passed to the change listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Added(String),
    Removed(String),
    Updated(String),
    Renamed { old: String, new: String },
    Reset,
}

impl RosterCommand {
    /// Applies the command to `records`, where `records[0]` is self.
    ///
    /// `Ok(None)` means the command was valid but changed nothing.
    pub(crate) fn apply(
        self,
        records: &mut Vec<CharacterRecord>,
    ) -> Result<Option<RosterChange>, RosterError> {
        match self {
            Self::Add(record) => {
                if record.name.trim().is_empty() {
                    return Err(RosterError::InvalidName(record.name));
                }
                if records.iter().any(|r| r.is_named(&record.name)) {
                    return Err(RosterError::NameTaken(record.name));
                }
                let name = record.name.clone();
                records.push(record);
                Ok(Some(RosterChange::Added(name)))
            }
            Self::Remove(name) => {
                if records.first().is_some_and(|me| me.is_named(&name)) {
                    return Err(RosterError::CannotRemoveSelf);
                }
                match records.iter().position(|r| r.is_named(&name)) {
                    Some(index) => {
                        let removed = records.remove(index);
                        Ok(Some(RosterChange::Removed(removed.name)))
                    }
                    None => Ok(None),
                }
            }
            Self::Update(mut fields) => {
                // The stored spelling of the name is kept.
                let name = fields.name.take().unwrap_or_default();
                let Some(record) = records.iter_mut().find(|r| r.is_named(&name)) else {
                    return Ok(None);
                };
                if record.apply(&fields) {
                    Ok(Some(RosterChange::Updated(record.name.clone())))
                } else {
                    Ok(None)
                }
            }
            Self::Upsert(fields) => {
                let name = fields.name_or_empty();
                if name.trim().is_empty() {
                    return Err(RosterError::InvalidName(name.to_string()));
                }
                if records.iter().any(|r| r.is_named(name)) {
                    Self::Update(fields).apply(records)
                } else {
                    Self::Add(CharacterRecord::from_fields(&fields)).apply(records)
                }
            }
            Self::Rename { old, new } => {
                if new.trim().is_empty() {
                    return Err(RosterError::InvalidName(new));
                }
                let Some(index) = records.iter().position(|r| r.is_named(&old)) else {
                    return Ok(None);
                };
                let collides = records
                    .iter()
                    .enumerate()
                    .any(|(i, r)| i != index && r.is_named(&new));
                if collides {
                    return Err(RosterError::NameTaken(new));
                }
                let old = std::mem::replace(&mut records[index].name, new.clone());
                Ok(Some(RosterChange::Renamed { old, new }))
            }
            Self::ResetAll => {
                if records.len() <= 1 {
                    return Ok(None);
                }
                records.truncate(1);
                Ok(Some(RosterChange::Reset))
            }
        }
    }
}
