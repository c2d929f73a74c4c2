//! Connection tasks.
//!
//! Every [`GroupSocket`] is owned by its own Tokio task. The owner (host or
//! peer engine) never touches the socket directly: it sends
//! [`SocketCommand`]s through a [`ConnectionHandle`] and receives
//! [`ConnectionEvent`]s on a shared channel. This keeps socket I/O and the
//! session timer out of the engine's run loop.
//!
//! ```text
//!   engine ──SocketCommand──▶ connection task ──bytes──▶ TCP/TLS
//!   engine ◀─ConnectionEvent── connection task ◀─bytes── TCP/TLS
//! ```

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::frame::DEFAULT_MAX_FRAME_LEN;
use crate::socket::{GroupSocket, ProtocolState};
use crate::tls::{PeerIdentity, TlsContext};
use crate::{ConnectionId, TransportError};

/// How long a closing socket may spend flushing its shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Timing and size limits for one connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Deadline for each of `AwaitingLogin` and `AwaitingInfo`.
    pub state_timeout: Duration,
    /// Deadline for name resolution plus TCP connect.
    pub connect_timeout: Duration,
    /// Largest frame accepted from the remote side.
    pub max_frame_len: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            state_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// How the connection task obtains its stream.
pub enum ConnectTarget {
    /// Resolve and dial a remote host.
    Dial { host: String, port: u16 },
    /// Use a stream produced by a listener.
    Accepted(TcpStream),
}

/// Requests from the engine to a connection task.
#[derive(Debug)]
pub enum SocketCommand {
    /// Write one frame.
    Send(Vec<u8>),
    /// Record a state transition and (re)arm or disarm the timer.
    SetState(ProtocolState),
    /// Write `announce` and immediately begin the server side of the TLS
    /// handshake, with no read in between.
    StartServerEncryption { announce: Vec<u8> },
    /// Begin the client side of the TLS handshake.
    StartClientEncryption,
    /// Close the socket and end the task.
    Close,
}

/// Notifications from a connection task to its engine.
#[derive(Debug)]
pub enum SocketEvent {
    /// The TCP connection is established.
    Connected { peer_addr: Option<SocketAddr> },
    /// One complete frame arrived. Frames are reported in arrival order.
    Frame(Vec<u8>),
    /// The TLS handshake completed.
    Encrypted(PeerIdentity),
    /// Something went wrong. A `Closed` event always follows.
    Error(TransportError),
    /// The task has ended; the handle is now inert.
    Closed,
}

/// A [`SocketEvent`] tagged with the connection it came from.
#[derive(Debug)]
pub struct ConnectionEvent {
    pub id: ConnectionId,
    pub event: SocketEvent,
}

/// Sender half for driving a connection task.
///
/// Cheap to clone. All methods are fire-and-forget: once the task has
/// ended they silently do nothing, and the engine learns about it from
/// the `Closed` event.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<SocketCommand>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, payload: Vec<u8>) {
        let _ = self.commands.send(SocketCommand::Send(payload));
    }

    pub fn set_state(&self, state: ProtocolState) {
        let _ = self.commands.send(SocketCommand::SetState(state));
    }

    pub fn start_server_encryption(&self, announce: Vec<u8>) {
        let _ = self
            .commands
            .send(SocketCommand::StartServerEncryption { announce });
    }

    pub fn start_client_encryption(&self) {
        let _ = self.commands.send(SocketCommand::StartClientEncryption);
    }

    pub fn close(&self) {
        let _ = self.commands.send(SocketCommand::Close);
    }

    /// Returns `true` once the task has ended.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Spawns the task that owns one connection.
pub fn spawn_connection(
    id: ConnectionId,
    target: ConnectTarget,
    tls: Option<TlsContext>,
    options: ConnectionOptions,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> ConnectionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = ConnectionTask {
        id,
        tls,
        options,
        commands: rx,
        events,
        deadline: None,
    };
    tokio::spawn(task.run(target));
    ConnectionHandle { id, commands: tx }
}

struct ConnectionTask {
    id: ConnectionId,
    tls: Option<TlsContext>,
    options: ConnectionOptions,
    commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    deadline: Option<(Instant, ProtocolState)>,
}

impl ConnectionTask {
    async fn run(mut self, target: ConnectTarget) {
        let connected = match target {
            ConnectTarget::Accepted(stream) => {
                Ok(GroupSocket::from_stream(stream, self.options.max_frame_len))
            }
            ConnectTarget::Dial { host, port } => {
                // Dialing races against Close so a stop request is not
                // held up by a slow DNS lookup.
                tokio::select! {
                    biased;
                    _ = wait_for_close(&mut self.commands) => {
                        self.emit(SocketEvent::Closed);
                        return;
                    }
                    result = GroupSocket::dial(
                        &host,
                        port,
                        self.options.connect_timeout,
                        self.options.max_frame_len,
                    ) => result,
                }
            }
        };

        let mut socket = match connected {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!(id = %self.id, error = %e, "connect failed");
                self.emit(SocketEvent::Error(e));
                self.emit(SocketEvent::Closed);
                return;
            }
        };

        tracing::debug!(id = %self.id, peer_addr = ?socket.peer_addr(), "connected");
        self.emit(SocketEvent::Connected {
            peer_addr: socket.peer_addr(),
        });

        loop {
            let deadline = self.deadline.map(|(at, _)| at);
            tokio::select! {
                biased;
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle_command(&mut socket, cmd).await.is_break() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    let err = match self.deadline {
                        Some((_, ProtocolState::AwaitingInfo)) => TransportError::InfoTimedOut,
                        _ => TransportError::LoginTimedOut,
                    };
                    tracing::debug!(id = %self.id, error = %err, "session timer fired");
                    self.emit(SocketEvent::Error(err));
                    break;
                }
                frame = socket.read_frame() => match frame {
                    Ok(frame) => self.emit(SocketEvent::Frame(frame)),
                    Err(TransportError::ConnectionClosed(reason)) => {
                        tracing::debug!(id = %self.id, %reason, "remote closed");
                        break;
                    }
                    Err(e) => {
                        self.emit(SocketEvent::Error(e));
                        break;
                    }
                },
            }
        }

        let _ = tokio::time::timeout(CLOSE_GRACE, socket.close()).await;
        socket.reset();
        self.deadline = None;
        self.emit(SocketEvent::Closed);
        tracing::debug!(id = %self.id, "connection task stopped");
    }

    async fn handle_command(
        &mut self,
        socket: &mut GroupSocket,
        cmd: SocketCommand,
    ) -> ControlFlow<()> {
        match cmd {
            SocketCommand::Send(payload) => {
                if let Err(e) = socket.write_frame(&payload).await {
                    self.emit(SocketEvent::Error(e));
                    return ControlFlow::Break(());
                }
            }
            SocketCommand::SetState(state) => {
                socket.set_state(state);
                self.deadline = state
                    .is_timed()
                    .then(|| (Instant::now() + self.options.state_timeout, state));
            }
            SocketCommand::StartServerEncryption { announce } => {
                if let Err(e) = socket.write_frame(&announce).await {
                    self.emit(SocketEvent::Error(e));
                    return ControlFlow::Break(());
                }
                return self.encrypt(socket, true).await;
            }
            SocketCommand::StartClientEncryption => {
                return self.encrypt(socket, false).await;
            }
            SocketCommand::Close => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn encrypt(&mut self, socket: &mut GroupSocket, as_server: bool) -> ControlFlow<()> {
        let Some(tls) = self.tls.clone() else {
            self.emit(SocketEvent::Error(TransportError::NotEncrypted(None)));
            return ControlFlow::Break(());
        };
        let deadline = self
            .deadline
            .map(|(at, _)| at)
            .unwrap_or_else(|| Instant::now() + self.options.state_timeout);

        let handshake = async {
            if as_server {
                socket.start_server_encryption(&tls).await
            } else {
                socket.start_client_encryption(&tls).await
            }
        };
        match tokio::time::timeout_at(deadline, handshake).await {
            Ok(Ok(peer)) => {
                tracing::debug!(id = %self.id, secret = %peer.secret, "encrypted");
                self.emit(SocketEvent::Encrypted(peer));
                ControlFlow::Continue(())
            }
            Ok(Err(e)) => {
                self.emit(SocketEvent::Error(e));
                ControlFlow::Break(())
            }
            Err(_) => {
                self.emit(SocketEvent::Error(TransportError::NotEncrypted(None)));
                ControlFlow::Break(())
            }
        }
    }

    fn emit(&self, event: SocketEvent) {
        let _ = self.events.send(ConnectionEvent { id: self.id, event });
    }
}

/// Resolves once a `Close` command arrives or every handle is dropped.
/// Other commands received while dialing are meaningless and dropped.
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<SocketCommand>) {
    while let Some(cmd) = commands.recv().await {
        if matches!(cmd, SocketCommand::Close) {
            return;
        }
    }
}
