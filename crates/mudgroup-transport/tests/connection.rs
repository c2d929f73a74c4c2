//! Integration tests for connection tasks over real loopback sockets.

use std::time::Duration;

use mudgroup_transport::{
    next_connection_id, spawn_connection, ConnectTarget, ConnectionEvent, ConnectionHandle,
    ConnectionOptions, GroupListener, ProtocolState, Secret, SocketEvent, TlsContext, TlsIdentity,
    TransportError,
};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

fn tls_context() -> (TlsContext, Secret) {
    let key = rcgen::KeyPair::generate().expect("key");
    let cert = rcgen::CertificateParams::default()
        .self_signed(&key)
        .expect("cert");
    let identity = TlsIdentity::from_pem(&cert.pem(), &key.serialize_pem()).expect("identity");
    let secret = identity.secret().expect("secret");
    (TlsContext::new(&identity).expect("tls"), secret)
}

fn options(state_timeout: Duration) -> ConnectionOptions {
    ConnectionOptions {
        state_timeout,
        connect_timeout: Duration::from_secs(5),
        max_frame_len: 4096,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel open")
        .event
}

/// Starts a listener and a dialing task, then spawns the accepting task.
/// Returns (server handle, server events, client handle, client events).
async fn connected_pair(
    server_tls: Option<TlsContext>,
    client_tls: Option<TlsContext>,
    opts: ConnectionOptions,
) -> (
    ConnectionHandle,
    mpsc::UnboundedReceiver<ConnectionEvent>,
    ConnectionHandle,
    mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let listener = GroupListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    let client = spawn_connection(
        next_connection_id(),
        ConnectTarget::Dial {
            host: "127.0.0.1".into(),
            port,
        },
        client_tls,
        opts,
        client_tx,
    );

    let (id, stream, _) = listener.accept().await.expect("accept");
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let server = spawn_connection(id, ConnectTarget::Accepted(stream), server_tls, opts, server_tx);

    assert!(matches!(next_event(&mut client_rx).await, SocketEvent::Connected { .. }));
    assert!(matches!(next_event(&mut server_rx).await, SocketEvent::Connected { .. }));
    (server, server_rx, client, client_rx)
}

// =========================================================================
// Framing over the wire
// =========================================================================

#[tokio::test]
async fn test_frames_arrive_in_send_order() {
    let (server, mut server_rx, client, _client_rx) =
        connected_pair(None, None, options(Duration::from_secs(30))).await;

    client.send(b"first".to_vec());
    client.send(b"second".to_vec());
    client.send(b"third".to_vec());

    for expected in [&b"first"[..], &b"second"[..], &b"third"[..]] {
        match next_event(&mut server_rx).await {
            SocketEvent::Frame(frame) => assert_eq!(frame, expected),
            other => panic!("expected frame, got {other:?}"),
        }
    }
    server.close();
}

#[tokio::test]
async fn test_close_reports_closed_to_both_sides() {
    let (server, mut server_rx, _client, mut client_rx) =
        connected_pair(None, None, options(Duration::from_secs(30))).await;

    server.close();
    assert!(matches!(next_event(&mut server_rx).await, SocketEvent::Closed));
    assert!(matches!(next_event(&mut client_rx).await, SocketEvent::Closed));
}

#[tokio::test]
async fn test_dial_refused_emits_error_then_closed() {
    let listener = GroupListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = spawn_connection(
        next_connection_id(),
        ConnectTarget::Dial {
            host: "127.0.0.1".into(),
            port,
        },
        None,
        ConnectionOptions::default(),
        tx,
    );

    match next_event(&mut rx).await {
        SocketEvent::Error(TransportError::ConnectionRefused { .. }) => {}
        other => panic!("expected refusal, got {other:?}"),
    }
    assert!(matches!(next_event(&mut rx).await, SocketEvent::Closed));
}

// =========================================================================
// Session timer
// =========================================================================

#[tokio::test]
async fn test_awaiting_login_times_out() {
    let (server, mut server_rx, _client, _client_rx) =
        connected_pair(None, None, options(Duration::from_millis(100))).await;

    server.set_state(ProtocolState::AwaitingLogin);
    match next_event(&mut server_rx).await {
        SocketEvent::Error(TransportError::LoginTimedOut) => {}
        other => panic!("expected login timeout, got {other:?}"),
    }
    assert!(matches!(next_event(&mut server_rx).await, SocketEvent::Closed));
}

#[tokio::test]
async fn test_awaiting_info_times_out_with_info_error() {
    let (server, mut server_rx, _client, _client_rx) =
        connected_pair(None, None, options(Duration::from_millis(100))).await;

    server.set_state(ProtocolState::AwaitingInfo);
    match next_event(&mut server_rx).await {
        SocketEvent::Error(TransportError::InfoTimedOut) => {}
        other => panic!("expected info timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_logged_in_cancels_timer() {
    let (server, mut server_rx, client, _client_rx) =
        connected_pair(None, None, options(Duration::from_millis(100))).await;

    server.set_state(ProtocolState::AwaitingLogin);
    server.set_state(ProtocolState::LoggedIn);
    tokio::time::sleep(Duration::from_millis(300)).await;

    client.send(b"still here".to_vec());
    match next_event(&mut server_rx).await {
        SocketEvent::Frame(frame) => assert_eq!(frame, b"still here"),
        other => panic!("expected frame, got {other:?}"),
    }
}

// =========================================================================
// TLS upgrade
// =========================================================================

#[tokio::test]
async fn test_tls_upgrade_exchanges_identities_and_carries_frames() {
    let (server_tls, server_secret) = tls_context();
    let (client_tls, client_secret) = tls_context();
    let (server, mut server_rx, client, mut client_rx) = connected_pair(
        Some(server_tls),
        Some(client_tls),
        options(Duration::from_secs(30)),
    )
    .await;

    server.start_server_encryption(b"go".to_vec());
    match next_event(&mut client_rx).await {
        SocketEvent::Frame(frame) => assert_eq!(frame, b"go"),
        other => panic!("expected announce frame, got {other:?}"),
    }
    client.start_client_encryption();

    match next_event(&mut server_rx).await {
        SocketEvent::Encrypted(peer) => assert_eq!(peer.secret, client_secret),
        other => panic!("expected server encrypted, got {other:?}"),
    }
    match next_event(&mut client_rx).await {
        SocketEvent::Encrypted(peer) => {
            assert_eq!(peer.secret, server_secret);
            assert!(peer.certificate_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        }
        other => panic!("expected client encrypted, got {other:?}"),
    }

    client.send(b"secret stuff".to_vec());
    match next_event(&mut server_rx).await {
        SocketEvent::Frame(frame) => assert_eq!(frame, b"secret stuff"),
        other => panic!("expected frame over tls, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tls_upgrade_against_plaintext_peer_is_not_encrypted() {
    let (server_tls, _) = tls_context();
    let (server, mut server_rx, client, _client_rx) = connected_pair(
        Some(server_tls),
        None,
        options(Duration::from_millis(300)),
    )
    .await;

    server.set_state(ProtocolState::AwaitingLogin);
    server.start_server_encryption(b"go".to_vec());
    // The client never starts TLS and instead sends plaintext garbage.
    client.send(b"not a client hello".to_vec());

    match next_event(&mut server_rx).await {
        SocketEvent::Error(TransportError::NotEncrypted(_)) => {}
        other => panic!("expected not encrypted, got {other:?}"),
    }
}
