//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mudgroup::protocol::{decode_message, encode_message, JsonCodec, Message};
use mudgroup::transport::{GroupSocket, PeerIdentity, TlsContext};
use mudgroup::trust::{MemoryBackend, TrustStore};
use mudgroup::{EventReceiver, GroupConfig, GroupEvent, GroupManager};

pub const WAIT: Duration = Duration::from_secs(10);

/// A config suitable for loopback tests: no dialogs, free port, short
/// timeouts.
pub fn config(name: &str) -> GroupConfig {
    GroupConfig {
        char_name: name.to_string(),
        host: "127.0.0.1".to_string(),
        local_port: 0,
        show_rules_warning: false,
        login_timeout_secs: 5,
        connect_timeout_secs: 5,
        ..GroupConfig::default()
    }
}

pub fn manager(config: GroupConfig) -> (GroupManager, EventReceiver) {
    GroupManager::new(config, Arc::new(MemoryBackend::new())).expect("manager")
}

/// Skips events until one matches, failing after [`WAIT`].
pub async fn wait_for(
    rx: &mut EventReceiver,
    mut matches: impl FnMut(&GroupEvent) -> bool,
) -> GroupEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

pub async fn wait_for_log(rx: &mut EventReceiver, text: &str) {
    wait_for(rx, |e| matches!(e, GroupEvent::Log(line) if line == text)).await;
}

/// Collects every event up to and including `NetworkDown`.
pub async fn collect_until_down(rx: &mut EventReceiver) -> Vec<GroupEvent> {
    let mut seen = Vec::new();
    wait_for(rx, |e| {
        seen.push(e.clone());
        *e == GroupEvent::NetworkDown
    })
    .await;
    seen
}

/// Polls `condition` until it holds, failing after [`WAIT`].
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

/// A standalone identity for a hand-driven encrypted client.
pub fn client_identity() -> (TrustStore, TlsContext) {
    let store = TrustStore::open(Arc::new(MemoryBackend::new())).expect("trust store");
    let identity = store
        .local_identity()
        .tls_identity()
        .expect("tls identity");
    let tls = TlsContext::new(&identity).expect("tls context");
    (store, tls)
}

// =========================================================================
// Raw protocol endpoint
// =========================================================================

/// One end of a plain-TCP group connection driven by hand, standing in
/// for an old client or host that only speaks the legacy protocol.
pub struct RawEnd {
    socket: GroupSocket,
}

impl RawEnd {
    pub fn new(socket: GroupSocket) -> Self {
        Self { socket }
    }

    pub async fn dial(port: u16) -> Self {
        let socket = GroupSocket::dial("127.0.0.1", port, WAIT, 1 << 20)
            .await
            .expect("dial");
        Self { socket }
    }

    /// Upgrades to TLS as the client, presenting `tls`'s identity.
    pub async fn encrypt(&mut self, tls: &TlsContext) -> PeerIdentity {
        within(self.socket.start_client_encryption(tls))
            .await
            .expect("tls handshake")
    }

    pub async fn send(&mut self, message: &Message) {
        let bytes = encode_message(&JsonCodec, message).expect("encode");
        self.socket.write_frame(&bytes).await.expect("write");
    }

    /// The next message, or `None` once the other side hung up.
    pub async fn recv(&mut self) -> Option<Message> {
        let frame = within(self.socket.read_frame()).await.ok()?;
        Some(decode_message(&JsonCodec, &frame).expect("decode"))
    }

    /// Skips messages until one matches.
    pub async fn recv_until(&mut self, mut matches: impl FnMut(&Message) -> bool) -> Message {
        loop {
            let message = self.recv().await.expect("connection closed early");
            if matches(&message) {
                return message;
            }
        }
    }

    /// Reads until the other side hangs up, returning what arrived.
    pub async fn drain(&mut self) -> Vec<Message> {
        let mut rest = Vec::new();
        while let Some(message) = self.recv().await {
            rest.push(message);
        }
        rest
    }
}
