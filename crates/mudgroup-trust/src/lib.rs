//! Trust decisions for mudgroup.
//!
//! Group members authenticate each other by the SHA-256 digest of their
//! self-signed certificates (a [`Secret`]). This crate owns:
//!
//! 1. **The local identity** ([`LocalIdentity`]): generated once, persisted
//!    through the backend, regenerated when missing, unreadable or expired.
//! 2. **Contacts**: the allowlist of secrets a host accepts when
//!    authorization is required, and the hosts a peer trusts.
//! 3. **Metadata** per contact (last name, address, login time, certificate).
//! 4. **Revocation events** ([`TrustEvent`]) that a running host reacts to.
//!
//! Persistence is somebody else's job: implement [`TrustBackend`] for your
//! storage, or use [`MemoryBackend`].

mod backend;
mod error;
mod identity;
mod store;

pub use backend::{MemoryBackend, MetadataField, TrustBackend};
pub use error::TrustError;
pub use identity::LocalIdentity;
pub use mudgroup_transport::Secret;
pub use store::{LoginRecord, TrustEvent, TrustStore};
