//! The host actor: accepts peers, authorizes them, relays their updates.
//!
//! ```text
//!              ┌──────────────┐
//!  listener ──▶│              │──▶ ConnectionHandle (per peer)
//!  conn events▶│  HostActor   │
//!  commands ──▶│              │──▶ Roster, GroupEvent
//!  revocations▶└──────────────┘
//! ```
//!
//! Revocations are polled first so a revoked peer is kicked before any of
//! its queued frames are applied.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use mudgroup_protocol::{CharacterFields, CharacterUpdate, Message, ProtocolVersion};
use mudgroup_roster::CharacterRecord;
use mudgroup_transport::{
    spawn_connection, ConnectTarget, ConnectionEvent, ConnectionHandle, ConnectionId,
    GroupListener, PeerIdentity, ProtocolState, SocketEvent, TlsContext,
};
use mudgroup_trust::{LoginRecord, MetadataField, TrustEvent};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

use crate::engine::{self, GroupMode, NetworkCommand, NetworkHandle, Shared};
use crate::{GroupError, GroupEvent};

const KICKED_BY_HOST: &str = "You have been kicked by the host!";
const REMOVED_FROM_CONTACTS: &str = "You have been removed from the host's contacts!";
const COMPROMISED_SECRET: &str = "Host does not trust your compromised secret.";
const NAME_TAKEN: &str = "The name you picked is already present!";

/// Binds the listener and spawns the host actor.
///
/// A bind failure is also reported to the user as a warning.
pub(crate) async fn spawn_host(shared: Shared) -> Result<NetworkHandle, GroupError> {
    let tls = shared.tls_context()?;
    let port = shared.config.read().local_port;
    let addr = format!("0.0.0.0:{port}");
    shared.events.log(format!("Listening on port {port}"));

    let listener = match GroupListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            shared
                .events
                .warning(format!("Failed to start the group manager server: {e}."));
            return Err(e.into());
        }
    };
    let local_addr = listener.local_addr().ok();

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();
    let actor = HostActor {
        revocations: shared.trust.subscribe(),
        shared,
        listener,
        tls,
        sessions: BTreeMap::new(),
        commands: commands_rx,
        conn_tx,
        conn_rx,
    };
    let task = tokio::spawn(actor.run());
    Ok(NetworkHandle {
        mode: GroupMode::Host,
        commands: commands_tx,
        task,
        local_addr,
    })
}

/// Who receives a host-originated or relayed message. Only logged-in
/// sessions ever do.
#[derive(Debug, Clone, Copy)]
enum Recipient {
    All,
    AllExcept(ConnectionId),
}

/// One peer connection as the host sees it.
struct Session {
    handle: ConnectionHandle,
    state: ProtocolState,
    /// Set once the handshake (or legacy login) is accepted.
    version: Option<ProtocolVersion>,
    /// The character name; empty until the login is accepted.
    name: String,
    identity: Option<PeerIdentity>,
    peer_addr: Option<SocketAddr>,
    /// Logged in with a secret that was in the contacts at the time.
    contact: bool,
}

impl Session {
    fn new(handle: ConnectionHandle, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            handle,
            state: ProtocolState::Unconnected,
            version: None,
            name: String::new(),
            identity: None,
            peer_addr,
            contact: false,
        }
    }

    /// Name if known, else address.
    fn identifier(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.peer_addr {
            Some(addr) => addr.to_string(),
            None => self.handle.id().to_string(),
        }
    }

    fn is_legacy(&self) -> bool {
        self.version.is_some_and(ProtocolVersion::is_legacy)
    }

    fn set_state(&mut self, state: ProtocolState) {
        self.state = state;
        self.handle.set_state(state);
    }
}

struct HostActor {
    shared: Shared,
    listener: GroupListener,
    tls: TlsContext,
    sessions: BTreeMap<ConnectionId, Session>,
    commands: mpsc::UnboundedReceiver<NetworkCommand>,
    conn_tx: mpsc::UnboundedSender<ConnectionEvent>,
    conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    revocations: broadcast::Receiver<TrustEvent>,
}

impl HostActor {
    async fn run(mut self) {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "host actor started");
        let mut revocations_open = true;

        loop {
            tokio::select! {
                biased;
                event = self.revocations.recv(), if revocations_open => match event {
                    Ok(TrustEvent::Revoked(secret)) => self.kick_secret(&secret),
                    Ok(TrustEvent::Refreshed(_)) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "trust events lagged, re-checking contacts");
                        self.kick_revoked_contacts();
                    }
                    Err(RecvError::Closed) => revocations_open = false,
                },
                cmd = self.commands.recv() => match cmd {
                    Some(NetworkCommand::Stop { ack }) => {
                        self.close_all();
                        let _ = ack.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.close_all();
                        break;
                    }
                },
                Some(event) = self.conn_rx.recv() => self.handle_connection_event(event),
                accepted = self.listener.accept() => match accepted {
                    Ok((id, stream, addr)) => self.accept(id, stream, addr),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }

        self.shared.events.emit(GroupEvent::NetworkDown);
        tracing::info!("host actor stopped");
    }

    // -----------------------------------------------------------------------
    // Commands from the facade
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, cmd: NetworkCommand) {
        match cmd {
            NetworkCommand::SelfUpdate(fields) => {
                if self.shared.config.read().share_self {
                    self.dispatch(
                        Recipient::All,
                        &Message::UpdateChar(CharacterUpdate::update(fields)),
                    );
                }
            }
            NetworkCommand::GroupTell(text) => {
                let from = self.shared.roster.self_name();
                self.dispatch(Recipient::All, &Message::GroupTell { from, text });
            }
            NetworkCommand::Rename { old, new } => {
                self.dispatch(
                    Recipient::All,
                    &Message::RenameChar {
                        old_name: old,
                        new_name: new,
                    },
                );
            }
            NetworkCommand::Kick(name) => {
                let target = self
                    .sessions
                    .iter()
                    .find(|(_, s)| !s.name.is_empty() && s.name.eq_ignore_ascii_case(&name))
                    .map(|(id, _)| *id);
                match target {
                    Some(id) => self.kick_session(id, KICKED_BY_HOST),
                    None => tracing::debug!(%name, "kick target not connected"),
                }
            }
            NetworkCommand::Stop { ack } => {
                // Handled in the run loop.
                let _ = ack.send(());
            }
        }
    }

    fn close_all(&mut self) {
        for (_, session) in std::mem::take(&mut self.sessions) {
            session.handle.close();
        }
        engine::accepted(self.shared.roster.reset_to_self_only());
        self.shared.events.log("Closed all group connections.");
    }

    // -----------------------------------------------------------------------
    // Connection events
    // -----------------------------------------------------------------------

    fn accept(&mut self, id: ConnectionId, stream: TcpStream, addr: SocketAddr) {
        let options = self.shared.config.read().connection_options();
        let handle = spawn_connection(
            id,
            ConnectTarget::Accepted(stream),
            Some(self.tls.clone()),
            options,
            self.conn_tx.clone(),
        );
        self.sessions.insert(id, Session::new(handle, Some(addr)));
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let ConnectionEvent { id, event } = event;
        let Some(session) = self.sessions.get_mut(&id) else {
            tracing::trace!(%id, "event for a closed session");
            return;
        };
        match event {
            SocketEvent::Connected { peer_addr } => {
                if peer_addr.is_some() {
                    session.peer_addr = peer_addr;
                }
                let offer = self.shared.config.read().max_version();
                engine::send(
                    &session.handle,
                    &Message::Handshake {
                        protocol_version: offer,
                    },
                );
                session.set_state(ProtocolState::AwaitingLogin);
            }
            SocketEvent::Frame(frame) => {
                if let Some(message) = engine::decode(id, &frame) {
                    self.handle_message(id, message);
                }
            }
            SocketEvent::Encrypted(identity) => {
                tracing::debug!(%id, secret = %identity.secret, "session encrypted");
                session.identity = Some(identity);
            }
            SocketEvent::Error(e) => {
                let who = session.identifier();
                self.shared
                    .events
                    .log(format!("'{who}' encountered an error: {e}"));
            }
            SocketEvent::Closed => self.on_closed(id),
        }
    }

    fn on_closed(&mut self, id: ConnectionId) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        if session.name.is_empty() {
            tracing::debug!(%id, who = %session.identifier(), "connection closed before login");
            return;
        }
        self.dispatch(
            Recipient::All,
            &Message::RemoveChar(CharacterFields::named(session.name.clone())),
        );
        engine::accepted(self.shared.roster.remove_character(session.name.clone()));
        self.shared.events.log(format!(
            "'{}' closed their connection and quit.",
            session.name
        ));
    }

    fn handle_message(&mut self, id: ConnectionId, message: Message) {
        let Some(state) = self.sessions.get(&id).map(|s| s.state) else {
            return;
        };
        match state {
            ProtocolState::Unconnected => {
                tracing::debug!(%id, kind = %message.kind(), "message before connect, ignoring");
            }
            ProtocolState::AwaitingLogin => self.on_awaiting_login(id, message),
            ProtocolState::AwaitingInfo => self.on_awaiting_info(id, message),
            ProtocolState::LoggedIn => self.on_logged_in(id, message),
        }
    }

    // -----------------------------------------------------------------------
    // AwaitingLogin
    // -----------------------------------------------------------------------

    fn on_awaiting_login(&mut self, id: ConnectionId, message: Message) {
        match message {
            Message::Handshake { protocol_version } => {
                self.negotiate(id, protocol_version, None);
            }
            Message::UpdateChar(update) => {
                let version = self.sessions.get(&id).and_then(|s| s.version);
                match version {
                    Some(v) if !v.is_legacy() => self.login(id, update.player),
                    // The legacy login doubles as the handshake.
                    _ => self.negotiate(id, update.login.unwrap_or_default(), Some(update.player)),
                }
            }
            other => {
                tracing::debug!(%id, kind = %other.kind(), "unexpected message while awaiting login");
            }
        }
    }

    fn negotiate(
        &mut self,
        id: ConnectionId,
        version: ProtocolVersion,
        legacy_login: Option<CharacterFields>,
    ) {
        let (require_auth, max) = {
            let config = self.shared.config.read();
            (config.require_auth, config.max_version())
        };
        if version < ProtocolVersion::LEGACY {
            return self.kick_session(
                id,
                "Host requires a newer version of the group protocol. \
                 Please upgrade to the latest MMapper.",
            );
        }
        if require_auth && version.is_legacy() {
            return self.kick_session(
                id,
                "Host requires authorization. Please upgrade to the latest MMapper.",
            );
        }
        if version > max {
            return self.kick_session(id, "Host uses an older version of MMapper and needs to upgrade.");
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.version = Some(version);
        tracing::debug!(%id, %version, "protocol version agreed");

        if version.is_legacy() {
            match legacy_login {
                Some(player) if player != CharacterFields::default() => self.login(id, player),
                Some(_) => self.kick_session(id, "Payload did not include 'playerData' element."),
                // Legacy peers normally skip the handshake; wait for the login.
                None => {}
            }
        } else if let Some(announce) = engine::encode(&Message::RequestLogin) {
            session.handle.start_server_encryption(announce);
        }
    }

    /// The authorization gate. On success the character joins the roster
    /// and the session moves on to `AwaitingInfo`.
    fn login(&mut self, id: ConnectionId, player: CharacterFields) {
        let name = player.name_or_empty().to_string();
        if name.is_empty() {
            return self.kick_session(id, "Payload did not include 'name' attribute.");
        }
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let who = session.identifier();
        let identity = session.identity.clone();
        let peer_addr = session.peer_addr;
        let version = session.version.unwrap_or_default();
        let encrypted = identity.is_some() && !version.is_legacy();

        let (require_auth, lock_group) = {
            let config = self.shared.config.read();
            (config.require_auth, config.lock_group)
        };
        let trust = Arc::clone(&self.shared.trust);
        let valid_secret = identity.as_ref().is_some_and(|i| trust.is_allowed(&i.secret));
        let valid_cert = identity
            .as_ref()
            .is_some_and(|i| trust.certificate_matches(&i.secret, &i.certificate_pem));

        let events = self.shared.events.clone();
        events.log(format!("'{who}' is trying to join the group as '{name}'."));
        if !version.is_legacy() && identity.is_none() {
            return self.kick_session(id, "Connection not successfully encrypted.");
        }
        match &identity {
            Some(identity) if encrypted => events.log(format!("'{who}'s secret: {}", identity.secret)),
            _ => events.log(format!(
                "WARNING: '{who}' has no secret and their connection is not encrypted."
            )),
        }
        events.log(format!("'{who}'s protocol version: {version}"));

        // Only one session per secret. A second login with a trusted
        // certificate replaces the first.
        let mut reconnect = false;
        if let Some(identity) = identity.as_ref().filter(|_| encrypted) {
            let previous = self
                .sessions
                .iter()
                .find(|(other, s)| {
                    **other != id && s.identity.as_ref().is_some_and(|i| i.secret == identity.secret)
                })
                .map(|(other, _)| *other);
            if let Some(previous) = previous {
                if !require_auth || valid_cert {
                    self.kick_session(previous, "Someone reconnected to the server using your secret!");
                    reconnect = true;
                } else {
                    return self.kick_session(id, COMPROMISED_SECRET);
                }
            }
        }

        if require_auth && !valid_secret {
            return self.kick_session(id, "Host has not added your secret to their contacts!");
        }
        if encrypted && require_auth && !valid_cert {
            return self.kick_session(id, COMPROMISED_SECRET);
        }
        if lock_group && !reconnect {
            return self.kick_session(id, "The host has locked the group!");
        }
        if engine::has_whitespace(&name) {
            return self.kick_session(id, "Your name must not include any whitespace");
        }
        if self.is_name_claimed(&name, id) {
            return self.kick_session(id, NAME_TAKEN);
        }

        if let Some(identity) = identity.as_ref().filter(|_| encrypted && valid_secret) {
            trust.record_login(
                &identity.secret,
                &LoginRecord {
                    name: Some(name.clone()),
                    address: peer_addr,
                    certificate_pem: Some(identity.certificate_pem.clone()),
                    at: Utc::now(),
                },
            );
        }

        if !engine::accepted(
            self.shared
                .roster
                .add_character(CharacterRecord::from_fields(&player)),
        ) {
            return self.kick_session(id, NAME_TAKEN);
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.name = name.clone();
        session.contact = encrypted && valid_secret;
        engine::send(&session.handle, &Message::Ack);
        session.set_state(ProtocolState::AwaitingInfo);
        events.log(format!("'{who}' will now be known as '{name}'"));
        self.dispatch(Recipient::AllExcept(id), &Message::AddChar(player));
    }

    // -----------------------------------------------------------------------
    // AwaitingInfo
    // -----------------------------------------------------------------------

    fn on_awaiting_info(&mut self, id: ConnectionId, message: Message) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        match message {
            Message::RequestInfo => {
                let share_self = self.shared.config.read().share_self;
                let selection = self.shared.roster.select_all();
                for (index, record) in selection.iter().enumerate() {
                    let is_self = index == 0;
                    if record.is_named(&session.name) || (is_self && !share_self) {
                        continue;
                    }
                    engine::send(
                        &session.handle,
                        &Message::UpdateChar(CharacterUpdate::update(record.to_fields())),
                    );
                }
                drop(selection);
                engine::send(&session.handle, &Message::RequestAck);
            }
            Message::Ack => {
                session.set_state(ProtocolState::LoggedIn);
                engine::send(&session.handle, &Message::StateLoggedIn);
                let name = session.name.clone();
                let legacy = session.is_legacy();
                self.shared
                    .events
                    .log(format!("'{name}' has successfully logged in."));
                if legacy {
                    let from = "MMapper".to_string();
                    let text = format!(
                        "WARNING: {name} joined the group with an insecure connection \
                         and needs to upgrade MMapper!"
                    );
                    self.dispatch(
                        Recipient::All,
                        &Message::GroupTell {
                            from: from.clone(),
                            text: text.clone(),
                        },
                    );
                    self.shared.events.emit(GroupEvent::GroupTell { from, text });
                }
            }
            Message::RequestAck => engine::send(&session.handle, &Message::Ack),
            other => {
                tracing::debug!(%id, kind = %other.kind(), "unexpected message while awaiting info");
            }
        }
    }

    // -----------------------------------------------------------------------
    // LoggedIn
    // -----------------------------------------------------------------------

    fn on_logged_in(&mut self, id: ConnectionId, message: Message) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let revoked = session.contact
            && session
                .identity
                .as_ref()
                .is_some_and(|i| !self.shared.trust.is_allowed(&i.secret));
        if revoked {
            return self.kick_session(id, REMOVED_FROM_CONTACTS);
        }

        match message {
            // A peer re-adding itself is just an update.
            Message::UpdateChar(CharacterUpdate { player, .. }) | Message::AddChar(player) => {
                if self.check_sender(id, player.name_or_empty()) {
                    engine::accepted(self.shared.roster.update_character(player.clone()));
                    self.dispatch(
                        Recipient::AllExcept(id),
                        &Message::UpdateChar(CharacterUpdate::update(player)),
                    );
                }
            }
            Message::RemoveChar(player) => {
                if self.check_sender(id, player.name_or_empty()) {
                    self.leave(id);
                }
            }
            Message::GroupTell { from, text } => {
                if self.check_sender(id, from.trim()) {
                    self.shared.events.emit(GroupEvent::GroupTell {
                        from: from.clone(),
                        text: text.clone(),
                    });
                    self.dispatch(Recipient::AllExcept(id), &Message::GroupTell { from, text });
                }
            }
            Message::RenameChar { old_name, new_name } => self.rename(id, old_name, new_name),
            Message::RequestAck => engine::send(&session.handle, &Message::Ack),
            other => {
                tracing::debug!(%id, kind = %other.kind(), "unexpected message while logged in");
            }
        }
    }

    /// Whether `name` belongs to self, to another session, or to a roster
    /// record. Sessions are checked too because their roster adds may still
    /// be queued behind a selection.
    fn is_name_claimed(&self, name: &str, asking: ConnectionId) -> bool {
        self.shared.roster.is_name_present(name)
            || self
                .sessions
                .iter()
                .any(|(id, s)| *id != asking && s.name.eq_ignore_ascii_case(name))
    }

    /// Kicks the session unless `claimed` is its own character.
    fn check_sender(&mut self, id: ConnectionId, claimed: &str) -> bool {
        let Some(session) = self.sessions.get(&id) else {
            return false;
        };
        if session.name.eq_ignore_ascii_case(claimed) {
            return true;
        }
        let reason = format!("Name spoof detected: {claimed} != {}", session.name);
        self.kick_session(id, &reason);
        false
    }

    fn rename(&mut self, id: ConnectionId, old_name: String, new_name: String) {
        if !self.check_sender(id, old_name.trim()) {
            return;
        }
        if new_name.trim().is_empty() || engine::has_whitespace(&new_name) {
            return self.kick_session(id, "Your name must not include any whitespace");
        }
        let taken =
            !new_name.eq_ignore_ascii_case(&old_name) && self.is_name_claimed(&new_name, id);
        if taken {
            return self.kick_session(id, "Someone was already using that name");
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.name = new_name.clone();
        if session.contact {
            if let Some(identity) = &session.identity {
                self.shared
                    .trust
                    .set_metadata(&identity.secret, MetadataField::Name, new_name.clone());
            }
        }
        engine::accepted(
            self.shared
                .roster
                .rename_character(old_name.clone(), new_name.clone()),
        );
        self.dispatch(Recipient::AllExcept(id), &Message::RenameChar { old_name, new_name });
    }

    /// The peer removed its own character: it is leaving.
    fn leave(&mut self, id: ConnectionId) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        self.dispatch(
            Recipient::All,
            &Message::RemoveChar(CharacterFields::named(session.name.clone())),
        );
        engine::accepted(self.shared.roster.remove_character(session.name.clone()));
        session.handle.close();
        self.shared
            .events
            .log(format!("'{}' left the group.", session.name));
    }

    // -----------------------------------------------------------------------
    // Kicking
    // -----------------------------------------------------------------------

    /// Tells the peer why, closes it, and removes its character.
    ///
    /// Legacy peers past `AwaitingLogin` cannot parse `StateKicked`, so they
    /// get the reason as a tell from the host's character.
    fn kick_session(&mut self, id: ConnectionId, reason: &str) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        let message = if session.is_legacy() && session.state != ProtocolState::AwaitingLogin {
            Message::GroupTell {
                from: self.shared.roster.self_name(),
                text: reason.to_string(),
            }
        } else {
            Message::StateKicked {
                reason: reason.to_string(),
            }
        };
        engine::send(&session.handle, &message);
        session.handle.close();

        let who = session.identifier();
        tracing::info!(%id, %who, %reason, "kicking session");
        self.shared.events.log(format!("'{who}' was kicked: {reason}"));

        if !session.name.is_empty() {
            self.dispatch(
                Recipient::All,
                &Message::RemoveChar(CharacterFields::named(session.name.clone())),
            );
            engine::accepted(self.shared.roster.remove_character(session.name));
        }
    }

    fn kick_secret(&mut self, secret: &mudgroup_trust::Secret) {
        let targets: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.identity.as_ref().is_some_and(|i| &i.secret == secret))
            .map(|(id, _)| *id)
            .collect();
        for id in targets {
            self.kick_session(id, REMOVED_FROM_CONTACTS);
        }
    }

    fn kick_revoked_contacts(&mut self) {
        let trust = &self.shared.trust;
        let targets: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                s.contact && s.identity.as_ref().is_some_and(|i| !trust.is_allowed(&i.secret))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in targets {
            self.kick_session(id, REMOVED_FROM_CONTACTS);
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn dispatch(&self, recipient: Recipient, message: &Message) {
        let Some(bytes) = engine::encode(message) else {
            return;
        };
        for (id, session) in &self.sessions {
            if session.state != ProtocolState::LoggedIn {
                continue;
            }
            if let Recipient::AllExcept(excluded) = recipient {
                if *id == excluded {
                    continue;
                }
            }
            session.handle.send(bytes.clone());
        }
    }
}
