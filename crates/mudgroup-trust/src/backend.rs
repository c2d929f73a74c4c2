//! Storage seam for the trust store.

use std::collections::HashMap;
use std::fmt;

use mudgroup_transport::Secret;
use parking_lot::Mutex;

use crate::LocalIdentity;

/// Per-contact fields remembered between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataField {
    /// Character name last seen with this secret.
    Name,
    IpAddress,
    /// RFC 3339 timestamp.
    LastLogin,
    /// PEM certificate first presented with this secret.
    Certificate,
    Port,
}

impl MetadataField {
    pub const ALL: [Self; 5] = [
        Self::Name,
        Self::IpAddress,
        Self::LastLogin,
        Self::Certificate,
        Self::Port,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::IpAddress => "ip",
            Self::LastLogin => "lastLogin",
            Self::Certificate => "certificate",
            Self::Port => "port",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External key-value storage for identity, contacts and metadata.
///
/// Implementations decide the format and location. Calls are synchronous
/// and expected to be fast (an in-memory map, a settings file that is
/// flushed elsewhere); the trust store never holds its own locks across
/// them.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` so one backend can be shared by the host and
/// peer tasks behind an `Arc`.
pub trait TrustBackend: Send + Sync + 'static {
    fn load_identity(&self) -> Option<LocalIdentity>;
    fn save_identity(&self, identity: &LocalIdentity);

    fn load_contacts(&self) -> Vec<Secret>;
    fn save_contacts(&self, contacts: &[Secret]);

    fn metadata(&self, secret: &Secret, field: MetadataField) -> Option<String>;
    fn set_metadata(&self, secret: &Secret, field: MetadataField, value: String);
}

#[derive(Default)]
struct MemoryState {
    identity: Option<LocalIdentity>,
    contacts: Vec<Secret>,
    metadata: HashMap<(Secret, MetadataField), String>,
}

/// A [`TrustBackend`] that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend pre-seeded with `contacts`.
    pub fn with_contacts(contacts: impl IntoIterator<Item = Secret>) -> Self {
        let backend = Self::new();
        backend.state.lock().contacts = contacts.into_iter().collect();
        backend
    }

    /// A backend pre-seeded with `identity`.
    pub fn with_identity(identity: LocalIdentity) -> Self {
        let backend = Self::new();
        backend.state.lock().identity = Some(identity);
        backend
    }
}

impl TrustBackend for MemoryBackend {
    fn load_identity(&self) -> Option<LocalIdentity> {
        self.state.lock().identity.clone()
    }

    fn save_identity(&self, identity: &LocalIdentity) {
        self.state.lock().identity = Some(identity.clone());
    }

    fn load_contacts(&self) -> Vec<Secret> {
        self.state.lock().contacts.clone()
    }

    fn save_contacts(&self, contacts: &[Secret]) {
        self.state.lock().contacts = contacts.to_vec();
    }

    fn metadata(&self, secret: &Secret, field: MetadataField) -> Option<String> {
        self.state
            .lock()
            .metadata
            .get(&(secret.clone(), field))
            .cloned()
    }

    fn set_metadata(&self, secret: &Secret, field: MetadataField, value: String) {
        self.state.lock().metadata.insert((secret.clone(), field), value);
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBackend")
            .field("has_identity", &state.identity.is_some())
            .field("contacts", &state.contacts.len())
            .field("metadata", &state.metadata.len())
            .finish()
    }
}
