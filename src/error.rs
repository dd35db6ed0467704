//! Crate error types
//!
//! Validation and store errors propagate to the caller unchanged; delivery
//! failures never do (they are contained inside the fan-out broker, see
//! `broker::DeliveryError`).

use thiserror::Error;

use crate::store::StoreError;

/// Error type for chat operations
#[derive(Debug, Error)]
pub enum ChatError {
    /// Operation targets a room that does not exist
    #[error("chat room '{0}' does not exist")]
    RoomNotFound(String),

    /// Create on a room identifier that is already taken
    #[error("chat room '{0}' already exists")]
    DuplicateRoom(String),

    /// A required input was empty after trimming
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    /// A stored or published payload could not be decoded.
    /// Fatal integrity fault for that read; never retried.
    #[error("malformed message payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// Store-level failure, passed through unchanged
    #[error(transparent)]
    Store(#[from] StoreError),
}
