//! Error types for the trust layer.

use mudgroup_transport::TransportError;

/// Errors raised while producing or loading the local identity.
///
/// Contact bookkeeping itself never fails: `allow`/`revoke` report whether
/// anything changed instead.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// The self-signed certificate or its key pair could not be generated.
    #[error("failed to generate identity: {0}")]
    Generation(#[from] rcgen::Error),

    /// The stored certificate or private key does not parse.
    #[error("invalid local identity: {0}")]
    InvalidIdentity(#[from] TransportError),
}
