//! # mudgroup
//!
//! Group synchronization for MUD mappers.
//!
//! One player hosts, the others join as peers, and everyone sees everyone
//! else's hit points, position, affects and room. The host relays every
//! update; peers only ever talk to the host.
//!
//! [`GroupManager`] is the whole public surface an application needs: feed
//! it score lines, prompts and room changes for the local character, start
//! it as host or peer, and consume [`GroupEvent`]s from the returned
//! receiver.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mudgroup::prelude::*;
//!
//! # async fn run() -> Result<(), GroupError> {
//! let config = GroupConfig::from_toml_str("char_name = \"Gandalf\"")?;
//! let (mut manager, mut events) = GroupManager::new(config, Arc::new(MemoryBackend::new()))?;
//! manager.start(GroupMode::Host).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod events;
mod host;
mod manager;
mod peer;
pub mod prompt;

pub use config::{GroupConfig, SharedConfig, DEFAULT_PORT};
pub use engine::GroupMode;
pub use error::GroupError;
pub use events::{EventReceiver, GroupEvent};
pub use manager::GroupManager;

pub use mudgroup_protocol as protocol;
pub use mudgroup_roster as roster;
pub use mudgroup_transport as transport;
pub use mudgroup_trust as trust;

/// Everything an application embedding the group manager usually needs.
pub mod prelude {
    pub use crate::{
        EventReceiver, GroupConfig, GroupError, GroupEvent, GroupManager, GroupMode, SharedConfig,
    };
    pub use mudgroup_protocol::{CharacterAffect, CharacterPosition, RoomId};
    pub use mudgroup_roster::{CharacterRecord, RosterChange};
    pub use mudgroup_trust::{MemoryBackend, TrustBackend, TrustStore};
}
