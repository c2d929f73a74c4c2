//! Group protocol versions and negotiation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A group protocol version number.
///
/// Only two versions are spoken:
///
/// | Version | Handshake | Login | Encryption |
/// |---|---|---|---|
/// | [`LEGACY`](Self::LEGACY) (102) | none | carries the version | never |
/// | [`ENCRYPTED`](Self::ENCRYPTED) (103) | explicit | after TLS | mandatory |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub u32);

impl ProtocolVersion {
    /// Oldest supported version: the login message doubles as the
    /// handshake and the connection stays in plaintext.
    pub const LEGACY: Self = Self(102);

    /// Current version: explicit handshake, then TLS, then login.
    pub const ENCRYPTED: Self = Self(103);

    /// The version both sides can speak: the lower of the two.
    pub fn negotiate(host_offer: Self, local_max: Self) -> Self {
        host_offer.min(local_max)
    }

    /// Returns `true` for the version that skips the handshake and TLS.
    pub fn is_legacy(self) -> bool {
        self <= Self::LEGACY
    }
}

impl Default for ProtocolVersion {
    /// Peers that omit a version are assumed to speak the legacy protocol.
    fn default() -> Self {
        Self::LEGACY
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
