//! Group manager configuration.

use std::sync::Arc;
use std::time::Duration;

use mudgroup_protocol::ProtocolVersion;
use mudgroup_transport::{ConnectionOptions, DEFAULT_MAX_FRAME_LEN};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

/// Default port for both listening and dialing.
pub const DEFAULT_PORT: u16 = 4243;

// ---------------------------------------------------------------------------
// GroupConfig
// ---------------------------------------------------------------------------

/// Everything the host and peer engines read from settings.
///
/// Missing keys in a TOML file take the defaults below, so a config only
/// has to name what it changes:
///
/// ```toml
/// char_name = "Gandalf"
/// host = "mume.example.org"
/// require_auth = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Host a peer dials.
    pub host: String,
    pub remote_port: u16,
    /// Port a host listens on. 0 picks a free port.
    pub local_port: u16,

    /// Only contacts may join (host), and only a contact may be joined
    /// (peer). Also rules out the legacy, unencrypted protocol.
    pub require_auth: bool,
    /// Host refuses new members; reconnects of present members still pass.
    pub lock_group: bool,
    /// Host sends its own character to peers.
    pub share_self: bool,

    /// The local character.
    pub char_name: String,
    /// `#rrggbb`.
    pub color: String,

    /// Show the rules reminder when the network comes up.
    pub show_rules_warning: bool,

    /// Retries after the first failed dial.
    pub reconnect_attempts: u32,
    /// Deadline for each of the login and info phases.
    pub login_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Largest frame accepted from another member.
    pub max_frame_len: usize,
    /// Highest protocol version offered (host) or proposed (peer).
    pub max_protocol_version: u32,

    /// ANSI SGR fragment used to colour received group tells, e.g. `[32m`.
    pub group_tell_color: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            remote_port: DEFAULT_PORT,
            local_port: DEFAULT_PORT,
            require_auth: false,
            lock_group: false,
            share_self: true,
            char_name: "Player".to_string(),
            color: "#ffff00".to_string(),
            show_rules_warning: true,
            reconnect_attempts: 3,
            login_timeout_secs: 30,
            connect_timeout_secs: 30,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_protocol_version: ProtocolVersion::ENCRYPTED.0,
            group_tell_color: "[32m".to_string(),
        }
    }
}

impl GroupConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The highest version this side speaks, never below the legacy one.
    pub fn max_version(&self) -> ProtocolVersion {
        ProtocolVersion(self.max_protocol_version).max(ProtocolVersion::LEGACY)
    }

    /// Timing and size limits for each connection task.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            state_timeout: Duration::from_secs(self.login_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_frame_len: self.max_frame_len,
        }
    }
}

// ---------------------------------------------------------------------------
// SharedConfig
// ---------------------------------------------------------------------------

/// A [`GroupConfig`] shared between the facade and the running engine.
///
/// The engine reads it on every decision, so edits made while running
/// (for example toggling `lock_group`) take effect immediately.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<GroupConfig>>);

impl SharedConfig {
    pub fn new(config: GroupConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// A copy of the current settings.
    pub fn get(&self) -> GroupConfig {
        self.0.read().clone()
    }

    pub fn set(&self, config: GroupConfig) {
        *self.0.write() = config;
    }

    /// Edits the settings in place.
    pub fn update(&self, f: impl FnOnce(&mut GroupConfig)) {
        f(&mut self.0.write());
    }

    /// Borrows the settings. Do not hold the guard across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, GroupConfig> {
        self.0.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml_str_fills_missing_keys_with_defaults() {
        let config = GroupConfig::from_toml_str(
            r#"
            char_name = "Gandalf"
            require_auth = true
            remote_port = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.char_name, "Gandalf");
        assert!(config.require_auth);
        assert_eq!(config.remote_port, 5000);
        assert_eq!(config.local_port, DEFAULT_PORT);
        assert_eq!(config.reconnect_attempts, 3);
        assert!(config.share_self);
    }

    #[test]
    fn test_from_toml_str_wrong_type_fails() {
        assert!(GroupConfig::from_toml_str("remote_port = \"high\"").is_err());
    }

    #[test]
    fn test_max_version_never_below_legacy() {
        let config = GroupConfig {
            max_protocol_version: 7,
            ..GroupConfig::default()
        };
        assert_eq!(config.max_version(), ProtocolVersion::LEGACY);
    }

    #[test]
    fn test_shared_config_update_is_visible_to_clones() {
        let shared = SharedConfig::new(GroupConfig::default());
        let other = shared.clone();
        shared.update(|c| c.lock_group = true);
        assert!(other.get().lock_group);
        assert!(other.read().lock_group);
    }

    #[test]
    fn test_connection_options_follow_config() {
        let config = GroupConfig {
            login_timeout_secs: 5,
            max_frame_len: 100,
            ..GroupConfig::default()
        };
        let options = config.connection_options();
        assert_eq!(options.state_timeout, Duration::from_secs(5));
        assert_eq!(options.max_frame_len, 100);
    }
}
