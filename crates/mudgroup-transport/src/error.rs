/// Errors produced while decoding the length-prefixed byte stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A frame announced more bytes than the parser accepts.
    #[error("frame exceeds maximum length of {max} bytes")]
    TooLarge { max: usize },
}

/// Errors that can occur in the transport layer.
///
/// Every variant renders as a human-readable line, because these errors
/// are surfaced to the user as log events rather than returned to callers
/// across the actor boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Name resolution produced no usable address.
    #[error("host not found: {host}")]
    HostNotFound {
        host: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The remote end actively refused the TCP connection.
    #[error("connection refused by {addr}")]
    ConnectionRefused {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Dialing did not complete within the connect timeout.
    #[error("connection timed out")]
    ConnectTimedOut,

    /// The session stayed in `AwaitingLogin` for too long.
    #[error("login timed out")]
    LoginTimedOut,

    /// The session stayed in `AwaitingInfo` for too long.
    #[error("info timed out")]
    InfoTimedOut,

    /// The TLS upgrade failed or never finished.
    #[error("connection not successfully encrypted")]
    NotEncrypted(#[source] Option<std::io::Error>),

    /// The byte stream violated the framing rules.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The remote end closed the connection.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Any other socket failure (reset, broken pipe, ...).
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Building the TLS configuration failed.
    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    /// The local certificate or key could not be parsed.
    #[error("invalid local identity: {0}")]
    InvalidIdentity(String),

    /// Binding the listening socket failed.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_errors_have_distinct_messages() {
        assert_eq!(TransportError::LoginTimedOut.to_string(), "login timed out");
        assert_eq!(TransportError::InfoTimedOut.to_string(), "info timed out");
        assert_eq!(
            TransportError::NotEncrypted(None).to_string(),
            "connection not successfully encrypted"
        );
    }

    #[test]
    fn test_frame_error_converts_transparently() {
        let err: TransportError = FrameError::TooLarge { max: 16 }.into();
        assert_eq!(err.to_string(), "frame exceeds maximum length of 16 bytes");
    }
}
