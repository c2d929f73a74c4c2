//! Error types for the roster.

/// Errors that can occur when mutating the roster.
///
/// All but [`Closed`](RosterError::Closed) are ordinary rejections: the
/// roster is left untouched and the caller decides what to tell the user.
/// `Closed` means someone scheduled work against a roster that was already
/// torn down, which is a bug in the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    /// Another record already uses this name (compared case-insensitively).
    #[error("the name '{0}' is already present")]
    NameTaken(String),

    /// Names must be non-empty.
    #[error("invalid character name '{0}'")]
    InvalidName(String),

    /// The local character can never leave its own roster.
    #[error("cannot remove yourself from the group")]
    CannotRemoveSelf,

    /// The roster has been closed.
    #[error("roster is closed")]
    Closed,
}
