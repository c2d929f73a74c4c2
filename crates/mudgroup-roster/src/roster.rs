//! The roster and its read guard.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use mudgroup_protocol::CharacterFields;
use parking_lot::Mutex;

use crate::{CharacterRecord, RosterChange, RosterCommand, RosterError};

/// Callback invoked after every applied change, outside the roster lock.
///
/// The listener may freely read the roster again (take a selection,
/// schedule commands); it is never called while the lock is held.
pub type ChangeListener = Arc<dyn Fn(&RosterChange) + Send + Sync>;

/// The result of submitting a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled {
    /// Ran immediately. `None` means it was valid but changed nothing.
    Applied(Option<RosterChange>),
    /// Ran immediately and was refused; the roster is unchanged.
    Rejected(RosterError),
    /// Queued behind an outstanding selection.
    Deferred,
}

impl Scheduled {
    /// `true` unless the command was rejected outright.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

struct Inner {
    /// `records[0]` is always self.
    records: Vec<CharacterRecord>,
    /// Number of outstanding selections.
    locks: usize,
    queue: VecDeque<RosterCommand>,
    closed: bool,
}

/// The ordered collection of group members, self first.
///
/// `Roster` is a cheap-to-clone handle; all clones share the same state.
///
/// ## Concurrency contract
///
/// - Mutations go through [`schedule`](Self::schedule) (or one of its
///   wrappers). With no selection outstanding they apply immediately.
/// - While any [`RosterSelection`] exists, submitted commands are queued
///   instead. Readers therefore never see a half-applied change and their
///   snapshot stays equal to the live roster.
/// - Dropping the last selection replays the queue in FIFO order.
///
/// The inner mutex is only held for the duration of one call and never
/// while user code runs, so a listener or a selection holder may call
/// back into the roster without deadlocking.
#[derive(Clone)]
pub struct Roster {
    inner: Arc<Mutex<Inner>>,
    listener: Option<ChangeListener>,
}

impl Roster {
    /// Creates a roster containing only `me`.
    pub fn new(me: CharacterRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: vec![me],
                locks: 0,
                queue: VecDeque::new(),
                closed: false,
            })),
            listener: None,
        }
    }

    /// Creates a roster that reports every applied change to `listener`.
    pub fn with_listener(me: CharacterRecord, listener: ChangeListener) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new(me)
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Applies `command` now, or queues it if a selection is outstanding.
    ///
    /// # Errors
    /// [`RosterError::Closed`] if the roster has been torn down. Ordinary
    /// refusals are reported as [`Scheduled::Rejected`] instead.
    pub fn schedule(&self, command: RosterCommand) -> Result<Scheduled, RosterError> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                tracing::error!(?command, "command scheduled on a closed roster");
                return Err(RosterError::Closed);
            }
            if inner.locks > 0 {
                tracing::trace!(?command, locks = inner.locks, "command deferred");
                inner.queue.push_back(command);
                return Ok(Scheduled::Deferred);
            }
            command.apply(&mut inner.records)
        };

        match outcome {
            Ok(change) => {
                if let Some(change) = &change {
                    self.notify(change);
                }
                Ok(Scheduled::Applied(change))
            }
            Err(e) => {
                tracing::info!(error = %e, "roster command rejected");
                Ok(Scheduled::Rejected(e))
            }
        }
    }

    pub fn add_character(&self, record: CharacterRecord) -> Result<Scheduled, RosterError> {
        self.schedule(RosterCommand::Add(record))
    }

    pub fn remove_character(&self, name: impl Into<String>) -> Result<Scheduled, RosterError> {
        self.schedule(RosterCommand::Remove(name.into()))
    }

    pub fn update_character(&self, fields: CharacterFields) -> Result<Scheduled, RosterError> {
        self.schedule(RosterCommand::Update(fields))
    }

    /// Updates `fields.name` if present, otherwise adds it.
    pub fn upsert_character(&self, fields: CharacterFields) -> Result<Scheduled, RosterError> {
        self.schedule(RosterCommand::Upsert(fields))
    }

    pub fn rename_character(
        &self,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Result<Scheduled, RosterError> {
        self.schedule(RosterCommand::Rename {
            old: old.into(),
            new: new.into(),
        })
    }

    pub fn reset_to_self_only(&self) -> Result<Scheduled, RosterError> {
        self.schedule(RosterCommand::ResetAll)
    }

    /// Tears the roster down. Queued commands are discarded and any later
    /// [`schedule`](Self::schedule) fails with [`RosterError::Closed`].
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.queue.clear();
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Locks the roster for reading and returns every record.
    pub fn select_all(&self) -> RosterSelection {
        let mut inner = self.inner.lock();
        inner.locks += 1;
        let records = inner.records.clone();
        drop(inner);
        RosterSelection {
            roster: self.clone(),
            records,
        }
    }

    /// Locks the roster for reading and returns the record named `name`,
    /// if any.
    pub fn select_by_name(&self, name: &str) -> RosterSelection {
        let mut inner = self.inner.lock();
        inner.locks += 1;
        let records = inner
            .records
            .iter()
            .filter(|r| r.is_named(name))
            .cloned()
            .collect();
        drop(inner);
        RosterSelection {
            roster: self.clone(),
            records,
        }
    }

    /// Case-insensitive membership test.
    pub fn is_name_present(&self, name: &str) -> bool {
        self.inner.lock().records.iter().any(|r| r.is_named(name))
    }

    /// Returns `true` if `name` is the local character.
    pub fn is_self_name(&self, name: &str) -> bool {
        self.inner
            .lock()
            .records
            .first()
            .is_some_and(|me| me.is_named(name))
    }

    /// A copy of the local character.
    pub fn self_record(&self) -> CharacterRecord {
        let inner = self.inner.lock();
        inner
            .records
            .first()
            .cloned()
            .unwrap_or_else(|| CharacterRecord::new(""))
    }

    pub fn self_name(&self) -> String {
        self.self_record().name
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Always `false`: self is always present.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn locks_outstanding(&self) -> usize {
        self.inner.lock().locks
    }

    pub fn pending_commands(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn release(&self) {
        let changes = {
            let mut inner = self.inner.lock();
            inner.locks = inner.locks.saturating_sub(1);
            if inner.locks > 0 {
                return;
            }
            let mut changes = Vec::new();
            while let Some(command) = inner.queue.pop_front() {
                match command.apply(&mut inner.records) {
                    Ok(Some(change)) => changes.push(change),
                    Ok(None) => {}
                    Err(e) => tracing::info!(error = %e, "deferred roster command rejected"),
                }
            }
            changes
        };
        for change in &changes {
            self.notify(change);
        }
    }

    fn notify(&self, change: &RosterChange) {
        match change {
            RosterChange::Added(name) => tracing::info!(name = %name, "character joined the group"),
            RosterChange::Removed(name) => tracing::info!(name = %name, "character left the group"),
            RosterChange::Updated(name) => tracing::trace!(name = %name, "character updated"),
            RosterChange::Renamed { old, new } => tracing::info!(old = %old, new = %new, "character renamed"),
            RosterChange::Reset => tracing::info!("roster reset to self only"),
        }
        if let Some(listener) = &self.listener {
            listener(change);
        }
    }
}

impl fmt::Debug for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Roster")
            .field("records", &inner.records.len())
            .field("locks", &inner.locks)
            .field("queued", &inner.queue.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RosterSelection
// ---------------------------------------------------------------------------

/// A read lock over the roster.
///
/// Holds a snapshot of the selected records. While it exists no mutation
/// is applied, so the snapshot is also the live state. Dropping it releases
/// the lock and, if it was the last one, replays queued commands.
pub struct RosterSelection {
    roster: Roster,
    records: Vec<CharacterRecord>,
}

impl RosterSelection {
    pub fn iter(&self) -> std::slice::Iter<'_, CharacterRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case-insensitive lookup within the selection.
    pub fn get(&self, name: &str) -> Option<&CharacterRecord> {
        self.records.iter().find(|r| r.is_named(name))
    }
}

impl<'a> IntoIterator for &'a RosterSelection {
    type Item = &'a CharacterRecord;
    type IntoIter = std::slice::Iter<'a, CharacterRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Drop for RosterSelection {
    fn drop(&mut self) {
        self.roster.release();
    }
}

impl fmt::Debug for RosterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.records.iter().map(|r| &r.name))
            .finish()
    }
}
