//! A single group connection: TCP stream, optional TLS, frame parser.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::frame::{encode_frame, FrameParser};
use crate::tls::{PeerIdentity, TlsContext};
use crate::TransportError;

/// Where a session is in the login sequence.
///
/// ```text
/// Unconnected → AwaitingLogin → AwaitingInfo → LoggedIn
/// ```
///
/// Entering `AwaitingLogin` or `AwaitingInfo` arms the session timeout;
/// reaching `LoggedIn` disarms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolState {
    #[default]
    Unconnected,
    AwaitingLogin,
    AwaitingInfo,
    LoggedIn,
}

impl ProtocolState {
    /// Returns `true` for the states guarded by the session timeout.
    pub fn is_timed(self) -> bool {
        matches!(self, Self::AwaitingLogin | Self::AwaitingInfo)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "Unconnected",
            Self::AwaitingLogin => "AwaitingLogin",
            Self::AwaitingInfo => "AwaitingInfo",
            Self::LoggedIn => "LoggedIn",
        };
        f.write_str(name)
    }
}

enum Stream {
    Plain(TcpStream),
    Server(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    Client(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Server(s) => s.read(buf).await,
            Self::Client(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.write_all(buf).await,
            Self::Server(s) => s.write_all(buf).await,
            Self::Client(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.flush().await,
            Self::Server(s) => s.flush().await,
            Self::Client(s) => s.flush().await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.shutdown().await,
            Self::Server(s) => s.shutdown().await,
            Self::Client(s) => s.shutdown().await,
        }
    }
}

/// One TCP connection to another group member.
///
/// Owns the stream (plain or TLS), the frame parser, and the per-session
/// fields that a reconnect must forget. All I/O is async; nothing here
/// blocks the runtime.
pub struct GroupSocket {
    stream: Option<Stream>,
    parser: FrameParser,
    state: ProtocolState,
    protocol_version: Option<u32>,
    name: Option<String>,
    peer_addr: Option<SocketAddr>,
    peer: Option<PeerIdentity>,
}

impl GroupSocket {
    /// Wraps an already connected (typically accepted) TCP stream.
    pub fn from_stream(stream: TcpStream, max_frame_len: usize) -> Self {
        let peer_addr = stream.peer_addr().ok();
        // Frames are small and latency-sensitive.
        let _ = stream.set_nodelay(true);
        Self {
            stream: Some(Stream::Plain(stream)),
            parser: FrameParser::new(max_frame_len),
            state: ProtocolState::Unconnected,
            protocol_version: None,
            name: None,
            peer_addr,
            peer: None,
        }
    }

    /// Resolves `host` and connects to the first address that answers.
    ///
    /// DNS failure, refusal, and timeout are reported as distinct errors.
    pub async fn dial(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        max_frame_len: usize,
    ) -> Result<Self, TransportError> {
        let addrs: Vec<SocketAddr> =
            match tokio::time::timeout(connect_timeout, tokio::net::lookup_host((host, port))).await {
                Err(_) => return Err(TransportError::ConnectTimedOut),
                Ok(Err(source)) => {
                    return Err(TransportError::HostNotFound {
                        host: host.to_string(),
                        source: Some(source),
                    });
                }
                Ok(Ok(addrs)) => addrs.collect(),
            };

        let mut last_error = None;
        for addr in addrs {
            tracing::debug!(%addr, "dialing");
            match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                Err(_) => return Err(TransportError::ConnectTimedOut),
                Ok(Ok(stream)) => return Ok(Self::from_stream(stream, max_frame_len)),
                Ok(Err(source)) => last_error = Some((addr, source)),
            }
        }

        match last_error {
            Some((addr, source)) if source.kind() == std::io::ErrorKind::ConnectionRefused => {
                Err(TransportError::ConnectionRefused { addr, source })
            }
            Some((_, source)) => Err(TransportError::Io(source)),
            None => Err(TransportError::HostNotFound {
                host: host.to_string(),
                source: None,
            }),
        }
    }

    /// Reads until one complete frame is available.
    ///
    /// Cancel-safe: bytes are only consumed from the stream by a completed
    /// read, and are fed to the parser before this returns.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.parser.next_frame() {
                return Ok(frame);
            }
            let stream = self.stream_mut()?;
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed("remote end hung up".into()));
            }
            self.parser.feed(&buf[..n])?;
        }
    }

    /// Writes one payload with its length prefix.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream_mut()?;
        stream.write_all(&encode_frame(payload)).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Upgrades the plain stream to TLS, acting as the server.
    pub async fn start_server_encryption(
        &mut self,
        tls: &TlsContext,
    ) -> Result<PeerIdentity, TransportError> {
        let tcp = self.take_plain()?;
        let stream = tls
            .acceptor()
            .accept(tcp)
            .await
            .map_err(|e| TransportError::NotEncrypted(Some(e)))?;
        let peer = PeerIdentity::from_chain(stream.get_ref().1.peer_certificates())
            .ok_or(TransportError::NotEncrypted(None))?;
        self.stream = Some(Stream::Server(Box::new(stream)));
        self.peer = Some(peer.clone());
        Ok(peer)
    }

    /// Upgrades the plain stream to TLS, acting as the client.
    pub async fn start_client_encryption(
        &mut self,
        tls: &TlsContext,
    ) -> Result<PeerIdentity, TransportError> {
        let tcp = self.take_plain()?;
        let stream = tls
            .connector()
            .connect(TlsContext::server_name()?, tcp)
            .await
            .map_err(|e| TransportError::NotEncrypted(Some(e)))?;
        let peer = PeerIdentity::from_chain(stream.get_ref().1.peer_certificates())
            .ok_or(TransportError::NotEncrypted(None))?;
        self.stream = Some(Stream::Client(Box::new(stream)));
        self.peer = Some(peer.clone());
        Ok(peer)
    }

    /// Shuts the stream down and forgets everything tied to this session.
    ///
    /// The socket can afterwards be discarded or replaced by a fresh dial;
    /// no partial frame survives.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.reset();
    }

    /// Clears buffered partial frames and all ephemeral session fields.
    pub fn reset(&mut self) {
        self.stream = None;
        self.parser.reset();
        self.state = ProtocolState::Unconnected;
        self.protocol_version = None;
        self.name = None;
        self.peer = None;
    }

    /// Stable identity of the remote certificate, once encrypted.
    pub fn fingerprint(&self) -> Option<&crate::Secret> {
        self.peer.as_ref().map(|p| &p.secret)
    }

    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn set_state(&mut self, state: ProtocolState) {
        self.state = state;
    }

    pub fn protocol_version(&self) -> Option<u32> {
        self.protocol_version
    }

    pub fn set_protocol_version(&mut self, version: u32) {
        self.protocol_version = Some(version);
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.stream, Some(Stream::Server(_) | Stream::Client(_)))
    }

    fn stream_mut(&mut self) -> Result<&mut Stream, TransportError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionClosed("socket is not connected".into()))
    }

    fn take_plain(&mut self) -> Result<TcpStream, TransportError> {
        // Plaintext read ahead of the TLS records would corrupt the handshake.
        self.parser.reset();
        match self.stream.take() {
            Some(Stream::Plain(tcp)) => Ok(tcp),
            Some(other) => {
                self.stream = Some(other);
                Err(TransportError::NotEncrypted(None))
            }
            None => Err(TransportError::ConnectionClosed("socket is not connected".into())),
        }
    }
}

impl fmt::Debug for GroupSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSocket")
            .field("state", &self.state)
            .field("peer_addr", &self.peer_addr)
            .field("name", &self.name)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}
