//! The group manager facade.
//!
//! [`GroupManager`] is what the rest of the application talks to. It owns
//! the roster and the trust store, starts and stops the host or peer
//! engine, and turns game output (score lines, prompts, affects) into
//! updates of the local character that are pushed to the group.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use mudgroup_protocol::{
    CharacterAffect, CharacterAffects, CharacterFields, CharacterPosition, RoomId,
};
use mudgroup_roster::{ChangeListener, CharacterRecord, Roster, RosterChange, Scheduled};
use mudgroup_trust::{TrustBackend, TrustStore};

use crate::config::{GroupConfig, SharedConfig};
use crate::engine::{GroupMode, NetworkCommand, NetworkHandle, Shared};
use crate::events::{EventReceiver, EventSink, GroupEvent};
use crate::prompt::{self, AffectTimers, Prompt, StatusParser};
use crate::{host, peer, GroupError};

const RULES_WARNING: &str = "Using the GroupManager in PK situations is ILLEGAL according to \
RULES ACTIONS.\n\nBe sure to disable the GroupManager under such conditions.";

/// Entry point for group synchronization.
pub struct GroupManager {
    shared: Shared,
    network: Option<NetworkHandle>,
    parser: StatusParser,
    last_prompt: Prompt,
    affect_timers: AffectTimers,
}

impl GroupManager {
    /// Creates the manager with a roster holding only the configured
    /// character.
    ///
    /// Fails only if no usable local identity can be loaded or generated.
    pub fn new(
        config: GroupConfig,
        backend: Arc<dyn TrustBackend>,
    ) -> Result<(Self, EventReceiver), GroupError> {
        let trust = Arc::new(TrustStore::open(backend)?);
        let (events, receiver) = EventSink::channel();

        let roster_events = events.clone();
        let listener: ChangeListener = Arc::new(move |change: &RosterChange| {
            roster_events.emit(GroupEvent::RosterChanged(change.clone()));
        });
        let mut me = CharacterRecord::new(config.char_name.clone());
        me.color.clone_from(&config.color);
        let roster = Roster::with_listener(me, listener);

        let manager = Self {
            shared: Shared {
                config: SharedConfig::new(config),
                roster,
                trust,
                events,
            },
            network: None,
            parser: StatusParser::new()?,
            last_prompt: Prompt::default(),
            affect_timers: AffectTimers::default(),
        };
        Ok((manager, receiver))
    }

    // -----------------------------------------------------------------------
    // Network lifecycle
    // -----------------------------------------------------------------------

    /// Starts hosting or joining. A running engine of another mode is
    /// stopped first; starting the mode already running does nothing.
    pub async fn start(&mut self, mode: GroupMode) -> Result<(), GroupError> {
        if mode == self.mode() {
            return Ok(());
        }
        self.stop().await;
        if mode == GroupMode::Off {
            return Ok(());
        }

        tracing::info!(%mode, "starting group network");
        self.shared.events.emit(GroupEvent::NetworkUp);
        if self.shared.config.read().show_rules_warning {
            self.shared.events.warning(RULES_WARNING);
        }

        let started = match mode {
            GroupMode::Host => host::spawn_host(self.shared.clone()).await,
            GroupMode::Peer => peer::spawn_peer(self.shared.clone()),
            GroupMode::Off => return Ok(()),
        };
        match started {
            Ok(network) => {
                self.network = Some(network);
                Ok(())
            }
            Err(e) => {
                tracing::error!(%mode, error = %e, "group network failed to start");
                self.shared.events.emit(GroupEvent::NetworkDown);
                Err(e)
            }
        }
    }

    /// Stops the engine and waits until every connection is closed and the
    /// roster holds only self.
    pub async fn stop(&mut self) {
        if let Some(network) = self.network.take() {
            tracing::info!(mode = %network.mode, "stopping group network");
            network.stop().await;
        }
    }

    /// The running mode. An engine that ended on its own (reconnects
    /// exhausted, kicked) reports `Off`.
    pub fn mode(&self) -> GroupMode {
        self.running().map_or(GroupMode::Off, |n| n.mode)
    }

    /// The address a running host listens on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().and_then(|n| n.local_addr)
    }

    fn running(&self) -> Option<&NetworkHandle> {
        self.network.as_ref().filter(|n| n.is_running())
    }

    fn issue(&self, command: NetworkCommand) -> bool {
        self.running().is_some_and(|n| n.send(command))
    }

    // -----------------------------------------------------------------------
    // Group actions
    // -----------------------------------------------------------------------

    /// Host only: removes `name` from the group. Returns whether a kick
    /// was issued.
    pub fn kick(&self, name: &str) -> bool {
        if self.shared.roster.is_self_name(name) {
            self.shared.events.warning("You can't kick yourself!");
            return false;
        }
        match self.mode() {
            GroupMode::Host => {}
            GroupMode::Peer => {
                self.shared.events.warning("Only the host can kick players.");
                return false;
            }
            GroupMode::Off => return false,
        }
        if !self.shared.roster.is_name_present(name) {
            return false;
        }
        self.issue(NetworkCommand::Kick(name.to_string()))
    }

    /// Sends a tell to everyone in the group.
    pub fn send_group_tell(&self, text: impl Into<String>) -> bool {
        self.issue(NetworkCommand::GroupTell(text.into()))
    }

    /// The line shown to the player for a received tell.
    pub fn format_group_tell(&self, from: &str, text: &str) -> String {
        let color = self.shared.config.read().group_tell_color.clone();
        format!("\x1b{color}{from} tells you [GT] '{text}'\x1b[0m")
    }

    // -----------------------------------------------------------------------
    // Local character
    // -----------------------------------------------------------------------

    /// Reads exact numbers from a `score` line. Returns `true` if self
    /// changed.
    pub fn parse_score(&mut self, line: &str) -> bool {
        let Some(score) = self.parser.parse_score(line) else {
            return false;
        };
        let me = self.shared.roster.self_record();
        let current = prompt::Score {
            hp: me.hp,
            maxhp: me.maxhp,
            mana: me.mana,
            maxmana: me.maxmana,
            moves: me.moves,
            maxmoves: me.maxmoves,
        };
        if score == current {
            return false;
        }
        self.shared.events.log(format!(
            "Updated score: {}/{} hits, {}/{} mana, and {}/{} moves.",
            score.hp, score.maxhp, score.mana, score.maxmana, score.moves, score.maxmoves
        ));
        self.apply_to_self(CharacterFields {
            hp: Some(score.hp),
            maxhp: Some(score.maxhp),
            mana: Some(score.mana),
            maxmana: Some(score.maxmana),
            moves: Some(score.moves),
            maxmoves: Some(score.maxmoves),
            ..CharacterFields::default()
        })
    }

    /// Estimates numbers and position from a prompt. Returns `true` if the
    /// prompt differed from the previous one.
    pub fn parse_prompt(&mut self, line: &str) -> bool {
        let Some(seen) = self.parser.parse_prompt(line) else {
            return false;
        };
        if seen == self.last_prompt {
            return false;
        }
        let me = self.shared.roster.self_record();
        let mut fields = CharacterFields {
            position: Some(seen.position_after(&self.last_prompt, me.position)),
            ..CharacterFields::default()
        };
        if me.maxhp != 0 {
            fields.hp = Some(prompt::estimate_hp(&seen.hp, me.hp, me.maxhp));
        }
        if me.maxmana != 0 {
            fields.mana = Some(prompt::estimate_mana(&seen.mana, me.mana, me.maxmana));
        }
        if me.maxmoves != 0 {
            fields.moves = Some(prompt::estimate_moves(&seen.moves, me.moves, me.maxmoves));
        }
        self.last_prompt = seen;
        self.apply_to_self(fields);
        true
    }

    pub fn set_room(&mut self, room: RoomId) -> bool {
        self.apply_to_self(CharacterFields {
            room: Some(room),
            ..CharacterFields::default()
        })
    }

    /// Rooms self is predicted to walk through.
    pub fn set_path(&mut self, rooms: Vec<RoomId>) -> bool {
        self.apply_to_self(CharacterFields {
            prespam: Some(rooms),
            ..CharacterFields::default()
        })
    }

    /// Death clears every affect, and self stays dead until it stands.
    pub fn update_position(&mut self, position: CharacterPosition) -> bool {
        let me = self.shared.roster.self_record();
        if me.position == position {
            return false;
        }
        if me.position == CharacterPosition::Dead && position != CharacterPosition::Standing {
            return false;
        }
        let mut fields = CharacterFields {
            position: Some(position),
            ..CharacterFields::default()
        };
        if position == CharacterPosition::Dead {
            self.affect_timers.clear();
            fields.affects = Some(CharacterAffects::new());
        }
        self.apply_to_self(fields)
    }

    pub fn update_affect(&mut self, affect: CharacterAffect, enabled: bool) -> bool {
        self.update_affect_at(affect, enabled, Instant::now())
    }

    /// Like [`update_affect`](Self::update_affect), stamping the affect as
    /// seen at `now`.
    pub fn update_affect_at(&mut self, affect: CharacterAffect, enabled: bool, now: Instant) -> bool {
        if enabled {
            self.affect_timers.seen(affect, now);
        } else {
            self.affect_timers.forget(affect);
        }
        let mut affects = self.shared.roster.self_record().affects;
        if !affects.set(affect, enabled) {
            return false;
        }
        self.apply_to_self(CharacterFields {
            affects: Some(affects),
            ..CharacterFields::default()
        })
    }

    /// Drops affects not reported for longer than their timeout.
    pub fn expire_affects(&mut self) -> Vec<CharacterAffect> {
        self.expire_affects_at(Instant::now())
    }

    pub fn expire_affects_at(&mut self, now: Instant) -> Vec<CharacterAffect> {
        let expired = self.affect_timers.take_expired(now);
        if expired.is_empty() {
            return expired;
        }
        let mut affects = self.shared.roster.self_record().affects;
        for affect in &expired {
            affects.set(*affect, false);
        }
        self.apply_to_self(CharacterFields {
            affects: Some(affects),
            ..CharacterFields::default()
        });
        expired
    }

    /// Forgets everything known about self except name and color.
    pub fn reset_self(&mut self) -> bool {
        self.last_prompt = Prompt::default();
        self.affect_timers.clear();
        self.apply_to_self(CharacterFields {
            hp: Some(0),
            maxhp: Some(0),
            mana: Some(0),
            maxmana: Some(0),
            moves: Some(0),
            maxmoves: Some(0),
            position: Some(CharacterPosition::Undefined),
            affects: Some(CharacterAffects::new()),
            room: Some(RoomId::UNKNOWN),
            prespam: Some(Vec::new()),
            ..CharacterFields::default()
        })
    }

    /// Applies the configured name and color to self.
    ///
    /// A new name already used by another member is refused and the
    /// configuration reverted.
    pub fn update_self(&mut self) -> bool {
        let (name, color) = {
            let config = self.shared.config.read();
            (config.char_name.clone(), config.color.clone())
        };
        let roster = &self.shared.roster;
        let me = roster.self_record();
        let mut changed = false;

        if me.name != name {
            let taken = !me.is_named(&name) && roster.is_name_present(&name);
            if taken || name.trim().is_empty() {
                self.shared
                    .events
                    .warning("You cannot take a name that is already present.");
                self.shared.config.update(|c| c.char_name.clone_from(&me.name));
            } else if crate::engine::accepted(roster.rename_character(me.name.clone(), name.clone())) {
                self.shared.events.log(format!("Renamed '{}' to '{name}'.", me.name));
                self.issue(NetworkCommand::Rename {
                    old: me.name.clone(),
                    new: name,
                });
                changed = true;
            }
        }
        if me.color != color {
            changed |= self.apply_to_self(CharacterFields {
                color: Some(color),
                ..CharacterFields::default()
            });
        }
        changed
    }

    /// Updates self in the roster and tells the group.
    fn apply_to_self(&self, mut fields: CharacterFields) -> bool {
        let mut me = self.shared.roster.self_record();
        fields.name = Some(me.name.clone());
        match self.shared.roster.update_character(fields.clone()) {
            Ok(Scheduled::Applied(None)) => return false,
            Ok(Scheduled::Applied(Some(_)) | Scheduled::Deferred) => {}
            Ok(Scheduled::Rejected(e)) => {
                tracing::warn!(error = %e, "self update rejected");
                return false;
            }
            Err(e) => {
                tracing::error!(error = %e, "roster unavailable");
                return false;
            }
        }
        // Send the whole record so late joiners converge.
        me.apply(&fields);
        self.issue(NetworkCommand::SelfUpdate(me.to_fields()));
        true
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn roster(&self) -> &Roster {
        &self.shared.roster
    }

    pub fn trust(&self) -> &Arc<TrustStore> {
        &self.shared.trust
    }

    pub fn config(&self) -> &SharedConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for GroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupManager")
            .field("mode", &self.mode())
            .field("roster", &self.shared.roster)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudgroup_trust::MemoryBackend;

    fn manager() -> (GroupManager, EventReceiver) {
        let config = GroupConfig {
            char_name: "Gandalf".into(),
            ..GroupConfig::default()
        };
        GroupManager::new(config, Arc::new(MemoryBackend::new())).expect("manager")
    }

    fn drain(rx: &mut EventReceiver) -> Vec<GroupEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_new_roster_holds_only_configured_self() {
        let (manager, _rx) = manager();
        assert_eq!(manager.roster().len(), 1);
        assert_eq!(manager.roster().self_name(), "Gandalf");
        assert_eq!(manager.mode(), GroupMode::Off);
    }

    #[test]
    fn test_parse_score_updates_self_once() {
        let (mut manager, _rx) = manager();
        let line = "100/120 hits, 50/80 mana, and 90/110 moves.";
        assert!(manager.parse_score(line));
        assert!(!manager.parse_score(line));
        let me = manager.roster().self_record();
        assert_eq!((me.hp, me.maxhp, me.mana, me.maxmana), (100, 120, 50, 80));
    }

    #[test]
    fn test_parse_prompt_estimates_within_band() {
        let (mut manager, _rx) = manager();
        manager.parse_score("100/100 hits, 100/100 mana, and 100/100 moves.");
        assert!(manager.parse_prompt("* HP:Hurt Mana:Cold>"));
        let me = manager.roster().self_record();
        assert_eq!(me.hp, 70);
        assert_eq!(me.mana, 25);
        assert_eq!(me.moves, 100);
        assert!(!manager.parse_prompt("* HP:Hurt Mana:Cold>"));
    }

    #[test]
    fn test_parse_prompt_combat_sets_fighting_then_standing() {
        let (mut manager, _rx) = manager();
        manager.parse_prompt("* HP:Fine Orc:Bad>");
        assert_eq!(manager.roster().self_record().position, CharacterPosition::Fighting);
        manager.parse_prompt("* HP:Fine>");
        assert_eq!(manager.roster().self_record().position, CharacterPosition::Standing);
    }

    #[test]
    fn test_update_position_dead_clears_affects_and_sticks() {
        let (mut manager, _rx) = manager();
        manager.update_affect(CharacterAffect::Poisoned, true);
        assert!(manager.update_position(CharacterPosition::Dead));
        assert!(manager.roster().self_record().affects.is_empty());

        assert!(!manager.update_position(CharacterPosition::Resting));
        assert_eq!(manager.roster().self_record().position, CharacterPosition::Dead);
        assert!(manager.update_position(CharacterPosition::Standing));
    }

    #[test]
    fn test_expire_affects_at_drops_only_timed_out() {
        let (mut manager, _rx) = manager();
        let start = Instant::now();
        manager.update_affect_at(CharacterAffect::Bashed, true, start);
        manager.update_affect_at(CharacterAffect::Blind, true, start);

        let expired = manager.expire_affects_at(start + std::time::Duration::from_secs(10));
        assert_eq!(expired, vec![CharacterAffect::Bashed]);
        let affects = manager.roster().self_record().affects;
        assert!(!affects.contains(CharacterAffect::Bashed));
        assert!(affects.contains(CharacterAffect::Blind));
    }

    #[test]
    fn test_reset_self_clears_numbers_and_prompt() {
        let (mut manager, _rx) = manager();
        manager.parse_score("10/20 hits and 30/40 moves.");
        manager.set_room(RoomId(7));
        manager.set_path(vec![RoomId(8), RoomId(9)]);
        assert_eq!(manager.roster().self_record().prespam, vec![RoomId(8), RoomId(9)]);

        assert!(manager.reset_self());
        let me = manager.roster().self_record();
        assert_eq!((me.hp, me.maxhp), (0, 0));
        assert_eq!(me.room, RoomId::UNKNOWN);
        assert!(me.prespam.is_empty());
        assert_eq!(me.name, "Gandalf");
    }

    #[test]
    fn test_update_self_refuses_present_name_and_reverts_config() {
        let (mut manager, mut rx) = manager();
        manager
            .roster()
            .add_character(CharacterRecord::new("Frodo"))
            .unwrap();
        manager.config().update(|c| c.char_name = "frodo".into());

        assert!(!manager.update_self());
        assert_eq!(manager.config().get().char_name, "Gandalf");
        assert!(drain(&mut rx).contains(&GroupEvent::Warning(
            "You cannot take a name that is already present.".into()
        )));
    }

    #[test]
    fn test_update_self_renames_and_recolors() {
        let (mut manager, mut rx) = manager();
        manager.config().update(|c| {
            c.char_name = "Mithrandir".into();
            c.color = "#123456".into();
        });
        assert!(manager.update_self());
        let me = manager.roster().self_record();
        assert_eq!(me.name, "Mithrandir");
        assert_eq!(me.color, "#123456");
        assert!(drain(&mut rx).contains(&GroupEvent::RosterChanged(RosterChange::Renamed {
            old: "Gandalf".into(),
            new: "Mithrandir".into(),
        })));
    }

    #[test]
    fn test_kick_self_warns_and_refuses() {
        let (manager, mut rx) = manager();
        assert!(!manager.kick("gandalf"));
        assert_eq!(
            drain(&mut rx),
            vec![GroupEvent::Warning("You can't kick yourself!".into())]
        );
    }

    #[test]
    fn test_format_group_tell_wraps_in_color() {
        let (manager, _rx) = manager();
        assert_eq!(
            manager.format_group_tell("Sam", "hi"),
            "\x1b[32mSam tells you [GT] 'hi'\x1b[0m"
        );
    }
}
