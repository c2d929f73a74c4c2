//! Unified error type for mudgroup.

use mudgroup_protocol::ProtocolError;
use mudgroup_roster::RosterError;
use mudgroup_transport::TransportError;
use mudgroup_trust::TrustError;

/// Top-level error that wraps all crate-specific errors.
///
/// Only setup and teardown return it. Once the host or peer is running,
/// network and protocol failures are reported as
/// [`GroupEvent`](crate::GroupEvent)s instead.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    /// The configuration file did not parse.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A built-in score or prompt pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let group_err: GroupError = err.into();
        assert!(matches!(group_err, GroupError::Transport(_)));
        assert!(group_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let group_err: GroupError = err.into();
        assert!(matches!(group_err, GroupError::Protocol(_)));
    }

    #[test]
    fn test_from_roster_error() {
        let group_err: GroupError = RosterError::Closed.into();
        assert!(matches!(group_err, GroupError::Roster(_)));
    }

    #[test]
    fn test_from_toml_error() {
        let err = toml::from_str::<toml::Table>("= nope").unwrap_err();
        let group_err: GroupError = err.into();
        assert!(group_err.to_string().starts_with("invalid configuration"));
    }
}
