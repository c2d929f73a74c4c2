//! Notifications from the group manager to the application.

use mudgroup_roster::RosterChange;
use tokio::sync::mpsc;

/// Something the application may want to show or react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// A line for the group log.
    Log(String),
    /// Needs the user's attention (a modal dialog in a GUI).
    Warning(String),
    RosterChanged(RosterChange),
    /// A group tell arrived, or the host broadcast one.
    GroupTell { from: String, text: String },
    NetworkUp,
    NetworkDown,
    /// A peer is dialing the host. `attempt` starts at 1.
    Connecting { attempt: u32 },
    /// A peer gave up after its last retry.
    ReconnectsExhausted,
    /// The host kicked this peer.
    Kicked { reason: String },
}

/// Receiving half returned by [`GroupManager::new`](crate::GroupManager::new).
pub type EventReceiver = mpsc::UnboundedReceiver<GroupEvent>;

/// Sending half shared by the facade and the engines.
///
/// Events are queued; a slow or absent consumer never blocks the engine.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<GroupEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: GroupEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn log(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(target: "mudgroup::log", "{text}");
        self.emit(GroupEvent::Log(text));
    }

    pub(crate) fn warning(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(target: "mudgroup::log", "{text}");
        self.emit(GroupEvent::Warning(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sink_log_and_warning_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.log("one");
        sink.warning("two");
        sink.emit(GroupEvent::NetworkDown);
        assert_eq!(rx.try_recv().unwrap(), GroupEvent::Log("one".into()));
        assert_eq!(rx.try_recv().unwrap(), GroupEvent::Warning("two".into()));
        assert_eq!(rx.try_recv().unwrap(), GroupEvent::NetworkDown);
    }

    #[test]
    fn test_event_sink_emit_without_receiver_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.log("nobody listens");
    }
}
