//! Error types for the protocol engine.
//!
//! Protocol-level trouble never surfaces here: malformed lines degrade to
//! [`Command::Unknown`](crate::command::Command::Unknown) and unexpected
//! message shapes become `Unaccounted` events. This module covers the
//! other taxonomy entry — caller mistakes that must fail fast.

use thiserror::Error;

/// Convenience type alias for Results using [`ClientError`].
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Precondition violations reported to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClientError {
    /// The operation requires an authenticated connection.
    #[error("client is not connected")]
    NotConnected,

    /// Credentials may only change while disconnected.
    #[error("credentials cannot be changed while connected")]
    AlreadyConnected,

    /// The client task has shut down and no longer accepts requests.
    #[error("client has shut down")]
    Shutdown,
}
