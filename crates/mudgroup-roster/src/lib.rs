//! The shared character roster for mudgroup.
//!
//! The roster is the only piece of mutable state shared between the
//! network engine and the rest of the application. Its one rule:
//!
//! > While anyone is reading, nobody writes.
//!
//! Readers take a [`RosterSelection`]. Writers submit a [`RosterCommand`];
//! if a selection is outstanding the command is queued, and the queue is
//! replayed in submission order when the last selection is dropped.
//!
//! # Key types
//!
//! - [`CharacterRecord`]: one member's full state
//! - [`Roster`]: the ordered collection, self first
//! - [`RosterSelection`]: RAII read guard over a snapshot
//! - [`RosterCommand`]: a deferred mutation
//! - [`RosterChange`]: what an applied mutation changed

mod command;
mod error;
mod record;
mod roster;

pub use command::{RosterChange, RosterCommand};
pub use error::RosterError;
pub use record::CharacterRecord;
pub use roster::{ChangeListener, Roster, RosterSelection, Scheduled};
