//! The trust store: local identity, contacts and their metadata.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mudgroup_transport::Secret;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::{LocalIdentity, MetadataField, TrustBackend, TrustError};

/// Capacity of the event channel. Revocations are rare; a lagging
/// subscriber only misses events older than this.
const EVENT_CAPACITY: usize = 64;

/// Something a running host or peer must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustEvent {
    /// The secret was removed from contacts. Sessions authenticated with it
    /// must be kicked.
    Revoked(Secret),
    /// The local identity was regenerated; this is the new secret.
    Refreshed(Secret),
}

/// What is remembered about a contact each time it logs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    /// Character name, when known. A peer does not learn the host's name
    /// until after it logs in.
    pub name: Option<String>,
    pub address: Option<SocketAddr>,
    pub certificate_pem: Option<String>,
    pub at: DateTime<Utc>,
}

/// Local identity, allowlist and per-secret metadata.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct TrustStore {
    backend: Arc<dyn TrustBackend>,
    identity: RwLock<LocalIdentity>,
    contacts: RwLock<Vec<Secret>>,
    events: broadcast::Sender<TrustEvent>,
}

impl TrustStore {
    /// Opens the store, generating a new identity if the backend has none,
    /// has an unreadable one, or has one that expired.
    pub fn open(backend: Arc<dyn TrustBackend>) -> Result<Self, TrustError> {
        let identity = match backend.load_identity() {
            None => {
                tracing::info!("no stored identity, generating one");
                Self::fresh_identity(backend.as_ref())?
            }
            Some(stored) => match LocalIdentity::from_pem(
                stored.certificate_pem,
                stored.private_key_pem,
                stored.expires_at,
            ) {
                Ok(identity) if identity.is_expired() => {
                    tracing::warn!(expired_at = %identity.expires_at, "refreshing expired identity");
                    Self::fresh_identity(backend.as_ref())?
                }
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!(error = %e, "refreshing invalid identity");
                    Self::fresh_identity(backend.as_ref())?
                }
            },
        };

        let mut contacts: Vec<Secret> = Vec::new();
        for secret in backend.load_contacts() {
            if !contacts.contains(&secret) {
                contacts.push(secret);
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        tracing::debug!(secret = %identity.secret, contacts = contacts.len(), "trust store opened");
        Ok(Self {
            backend,
            identity: RwLock::new(identity),
            contacts: RwLock::new(contacts),
            events,
        })
    }

    fn fresh_identity(backend: &dyn TrustBackend) -> Result<LocalIdentity, TrustError> {
        let identity = LocalIdentity::generate()?;
        backend.save_identity(&identity);
        Ok(identity)
    }

    // -----------------------------------------------------------------------
    // Local identity
    // -----------------------------------------------------------------------

    /// The identity to present. One that has expired since the store was
    /// opened is replaced first.
    pub fn local_identity(&self) -> LocalIdentity {
        self.local_identity_at(Utc::now())
    }

    pub fn local_identity_at(&self, now: DateTime<Utc>) -> LocalIdentity {
        let current = self.identity.read().clone();
        if !current.is_expired_at(now) {
            return current;
        }
        tracing::warn!(expired_at = %current.expires_at, "local identity expired while running");
        match self.refresh() {
            Ok(_) => self.identity.read().clone(),
            Err(e) => {
                tracing::error!(error = %e, "could not replace expired identity");
                current
            }
        }
    }

    /// The secret other members know us by.
    pub fn secret(&self) -> Secret {
        self.identity.read().secret.clone()
    }

    /// Replaces the local identity with a freshly generated one.
    ///
    /// Hosts and peers already connected keep the old certificate until
    /// they reconnect.
    pub fn refresh(&self) -> Result<Secret, TrustError> {
        let identity = Self::fresh_identity(self.backend.as_ref())?;
        let secret = identity.secret.clone();
        *self.identity.write() = identity;
        tracing::info!(%secret, "local identity refreshed");
        let _ = self.events.send(TrustEvent::Refreshed(secret.clone()));
        Ok(secret)
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    /// Adds `secret` to the contacts. Returns `false` if it was already there.
    pub fn allow(&self, secret: &Secret) -> bool {
        let snapshot = {
            let mut contacts = self.contacts.write();
            if contacts.contains(secret) {
                return false;
            }
            contacts.push(secret.clone());
            contacts.clone()
        };
        self.backend.save_contacts(&snapshot);
        tracing::info!(%secret, "contact added");
        true
    }

    /// Removes `secret` from the contacts and announces the revocation.
    /// Returns `false` if it was not a contact.
    pub fn revoke(&self, secret: &Secret) -> bool {
        let snapshot = {
            let mut contacts = self.contacts.write();
            let Some(index) = contacts.iter().position(|s| s == secret) else {
                return false;
            };
            contacts.remove(index);
            contacts.clone()
        };
        self.backend.save_contacts(&snapshot);
        tracing::info!(%secret, "contact revoked");
        // Sent after removal so receivers already see is_allowed == false.
        let _ = self.events.send(TrustEvent::Revoked(secret.clone()));
        true
    }

    pub fn is_allowed(&self, secret: &Secret) -> bool {
        self.contacts.read().contains(secret)
    }

    pub fn contacts(&self) -> Vec<Secret> {
        self.contacts.read().clone()
    }

    /// `true` if `presented_pem` is the certificate stored for `secret`, or
    /// if none has been stored yet.
    pub fn certificate_matches(&self, secret: &Secret, presented_pem: &str) -> bool {
        match self.backend.metadata(secret, MetadataField::Certificate) {
            Some(stored) if !stored.trim().is_empty() => stored.trim() == presented_pem.trim(),
            _ => true,
        }
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn metadata(&self, secret: &Secret, field: MetadataField) -> Option<String> {
        self.backend.metadata(secret, field)
    }

    pub fn set_metadata(&self, secret: &Secret, field: MetadataField, value: impl Into<String>) {
        self.backend.set_metadata(secret, field, value.into());
    }

    /// Remembers a login for a contact. Strangers are not recorded; returns
    /// whether anything was stored.
    pub fn record_login(&self, secret: &Secret, record: &LoginRecord) -> bool {
        if !self.is_allowed(secret) {
            return false;
        }
        if let Some(name) = &record.name {
            self.set_metadata(secret, MetadataField::Name, name.clone());
        }
        self.set_metadata(secret, MetadataField::LastLogin, record.at.to_rfc3339());
        if let Some(address) = record.address {
            self.set_metadata(secret, MetadataField::IpAddress, address.ip().to_string());
            self.set_metadata(secret, MetadataField::Port, address.port().to_string());
        }
        if let Some(pem) = &record.certificate_pem {
            self.set_metadata(secret, MetadataField::Certificate, pem.clone());
        }
        tracing::debug!(%secret, name = ?record.name, "login recorded");
        true
    }

    pub fn last_login(&self, secret: &Secret) -> Option<DateTime<Utc>> {
        let stamp = self.metadata(secret, MetadataField::LastLogin)?;
        DateTime::parse_from_rfc3339(&stamp)
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<TrustEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("secret", &self.identity.read().secret)
            .field("contacts", &self.contacts.read().len())
            .finish_non_exhaustive()
    }
}
