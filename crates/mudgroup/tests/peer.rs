//! Peer engine against a hand-driven legacy host and an absent host.

mod common;

use common::{collect_until_down, config, eventually, manager, wait_for, wait_for_log, RawEnd};
use mudgroup::protocol::{CharacterFields, CharacterUpdate, Message, ProtocolVersion};
use mudgroup::roster::RosterChange;
use mudgroup::transport::{GroupSocket, DEFAULT_MAX_FRAME_LEN};
use mudgroup::{GroupEvent, GroupMode};
use tokio::net::TcpListener;

// =========================================================================
// Helpers
// =========================================================================

async fn fake_host() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> RawEnd {
    let (stream, _) = common::within(listener.accept()).await.expect("accept");
    RawEnd::new(GroupSocket::from_stream(stream, DEFAULT_MAX_FRAME_LEN))
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let (listener, port) = fake_host().await;
    drop(listener);
    port
}

/// Plays a legacy host through the login and info phases.
async fn legacy_host_login(host: &mut RawEnd) {
    host.send(&Message::Handshake {
        protocol_version: ProtocolVersion::LEGACY,
    })
    .await;

    let login = host.recv().await.expect("login");
    let Message::UpdateChar(CharacterUpdate { login, player }) = login else {
        panic!("expected a login, got {login:?}");
    };
    assert_eq!(login, Some(ProtocolVersion::LEGACY));
    assert_eq!(player.name_or_empty(), "Frodo");

    host.send(&Message::Ack).await;
    assert_eq!(host.recv().await, Some(Message::RequestInfo));

    let mut gandalf = CharacterFields::named("Gandalf");
    gandalf.hp = Some(90);
    host.send(&Message::UpdateChar(CharacterUpdate::update(gandalf)))
        .await;
    host.send(&Message::StateLoggedIn).await;
}

// =========================================================================
// Legacy host
// =========================================================================

#[tokio::test]
async fn test_legacy_host_negotiates_down_and_logs_in() {
    let (listener, port) = fake_host().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");

    let mut host = accept(&listener).await;
    legacy_host_login(&mut host).await;

    wait_for_log(
        &mut rx,
        "WARNING: Host does not support encryption and your connection is insecure.",
    )
    .await;
    wait_for(&mut rx, |e| *e == GroupEvent::RosterChanged(RosterChange::Added("Gandalf".into()))).await;
    wait_for_log(&mut rx, "You are now logged in to the group.").await;
    assert_eq!(peer.roster().len(), 2);

    // Self updates now flow to the host.
    assert!(peer.parse_score("30/60 hits and 70/80 moves."));
    let update = host
        .recv_until(|m| matches!(m, Message::UpdateChar(_)))
        .await;
    let Message::UpdateChar(update) = update else {
        unreachable!()
    };
    assert_eq!(update.login, None);
    assert_eq!(update.player.name_or_empty(), "Frodo");
    assert_eq!(update.player.hp, Some(30));

    peer.stop().await;
}

#[tokio::test]
async fn test_host_tell_and_removal_reach_peer() {
    let (listener, port) = fake_host().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");
    let mut host = accept(&listener).await;
    legacy_host_login(&mut host).await;
    wait_for_log(&mut rx, "You are now logged in to the group.").await;

    host.send(&Message::GroupTell {
        from: "Gandalf".into(),
        text: "fly, you fools".into(),
    })
    .await;
    let tell = wait_for(&mut rx, |e| matches!(e, GroupEvent::GroupTell { .. })).await;
    assert_eq!(
        tell,
        GroupEvent::GroupTell {
            from: "Gandalf".into(),
            text: "fly, you fools".into()
        }
    );

    // A host claiming to update or remove self is ignored.
    let mut forged = CharacterFields::named("Frodo");
    forged.hp = Some(1);
    host.send(&Message::UpdateChar(CharacterUpdate::update(forged)))
        .await;
    host.send(&Message::RemoveChar(CharacterFields::named("Frodo")))
        .await;
    host.send(&Message::RemoveChar(CharacterFields::named("Gandalf")))
        .await;

    wait_for(&mut rx, |e| *e == GroupEvent::RosterChanged(RosterChange::Removed("Gandalf".into()))).await;
    assert_eq!(peer.roster().len(), 1);
    assert_eq!(peer.roster().self_record().hp, 0);

    peer.stop().await;
}

#[tokio::test]
async fn test_add_then_update_while_roster_is_read_keeps_update() {
    let (listener, port) = fake_host().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");
    let mut host = accept(&listener).await;
    legacy_host_login(&mut host).await;
    wait_for_log(&mut rx, "You are now logged in to the group.").await;

    let selection = peer.roster().select_all();
    host.send(&Message::AddChar(CharacterFields::named("Sam")))
        .await;
    let mut sam = CharacterFields::named("Sam");
    sam.hp = Some(42);
    sam.maxhp = Some(50);
    host.send(&Message::UpdateChar(CharacterUpdate::update(sam)))
        .await;
    eventually(|| peer.roster().pending_commands() == 2).await;
    drop(selection);

    let selection = peer.roster().select_by_name("Sam");
    let sam = selection.get("Sam").expect("Sam was added");
    assert_eq!((sam.hp, sam.maxhp), (42, 50));
    drop(selection);

    peer.stop().await;
}

#[tokio::test]
async fn test_kicked_peer_stops_without_retry() {
    let (listener, port) = fake_host().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");
    let mut host = accept(&listener).await;
    legacy_host_login(&mut host).await;
    wait_for_log(&mut rx, "You are now logged in to the group.").await;

    host.send(&Message::StateKicked {
        reason: "begone".into(),
    })
    .await;

    let events = collect_until_down(&mut rx).await;
    assert!(events.contains(&GroupEvent::Kicked {
        reason: "begone".into()
    }));
    assert!(events.contains(&GroupEvent::Warning("You got kicked! Reason: begone".into())));
    assert!(!events.iter().any(|e| matches!(e, GroupEvent::Connecting { .. })));
    assert_eq!(peer.roster().len(), 1);
    eventually(|| peer.mode() == GroupMode::Off).await;
}

#[tokio::test]
async fn test_require_auth_refuses_legacy_host() {
    let (listener, port) = fake_host().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    cfg.require_auth = true;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");

    let mut host = accept(&listener).await;
    host.send(&Message::Handshake {
        protocol_version: ProtocolVersion::LEGACY,
    })
    .await;

    let events = collect_until_down(&mut rx).await;
    assert!(events.iter().any(|e| matches!(
        e,
        GroupEvent::Warning(text) if text.starts_with("Host does not support encryption.")
    )));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, GroupEvent::Connecting { .. }))
            .count(),
        1
    );
    // Nothing was sent: the login never went out.
    assert!(host.drain().await.is_empty());
}

// =========================================================================
// Reconnects
// =========================================================================

#[tokio::test]
async fn test_refused_connection_retries_then_gives_up() {
    let port = closed_port().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    cfg.reconnect_attempts = 3;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");

    let events = collect_until_down(&mut rx).await;
    let attempts: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            GroupEvent::Connecting { attempt } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
    assert!(events.contains(&GroupEvent::ReconnectsExhausted));

    // Only the final failure needs the user's attention.
    let refused = format!("Connection refused: Tried to connect to 127.0.0.1 on port {port}.");
    let warnings: Vec<&GroupEvent> = events
        .iter()
        .filter(|e| matches!(e, GroupEvent::Warning(_)))
        .collect();
    assert_eq!(warnings, vec![&GroupEvent::Warning(refused)]);

    eventually(|| peer.mode() == GroupMode::Off).await;
}

#[tokio::test]
async fn test_zero_attempts_gives_up_after_first_dial() {
    let port = closed_port().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    cfg.reconnect_attempts = 0;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");

    let events = collect_until_down(&mut rx).await;
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, GroupEvent::Connecting { .. }))
            .count(),
        1
    );
    assert!(events.contains(&GroupEvent::ReconnectsExhausted));
}

#[tokio::test]
async fn test_dropped_host_is_redialed() {
    let (listener, port) = fake_host().await;
    let mut cfg = config("Frodo");
    cfg.remote_port = port;
    let (mut peer, mut rx) = manager(cfg);
    peer.start(GroupMode::Peer).await.expect("peer starts");

    let mut host = accept(&listener).await;
    legacy_host_login(&mut host).await;
    wait_for_log(&mut rx, "You are now logged in to the group.").await;
    drop(host);

    wait_for_log(&mut rx, "Server closed the connection").await;
    wait_for(&mut rx, |e| *e == GroupEvent::Connecting { attempt: 1 }).await;
    eventually(|| peer.roster().len() == 1).await;

    // The second connection logs in from scratch.
    let mut host = accept(&listener).await;
    legacy_host_login(&mut host).await;
    wait_for_log(&mut rx, "You are now logged in to the group.").await;
    assert_eq!(peer.roster().len(), 2);

    peer.stop().await;
    assert_eq!(peer.roster().len(), 1);
}
