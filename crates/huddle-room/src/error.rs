//! Error types for the room layer.
//!
//! Expected join rejections (room full, wrong password, ...) are not
//! errors; they are [`JoinRejection`](crate::JoinRejection) values inside
//! a [`JoinOutcome`](crate::JoinOutcome).

use huddle_protocol::{RoomId, UnknownPermission, UserId};

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist (or was evicted).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// `permission` was neither `public` nor `private`.
    #[error(transparent)]
    InvalidPermission(#[from] UnknownPermission),

    /// Only the owner may change or delete a room.
    #[error("user {user_id} does not own room {room_id}")]
    NotOwner { room_id: RoomId, user_id: UserId },

    /// Requested capacity is zero, above the configured limit, or below
    /// the minimum player count.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),

    /// The cache could not persist the room.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}

impl RoomError {
    /// The `error` string sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "room_not_found",
            Self::InvalidPermission(_) => "invalid_permission",
            Self::NotOwner { .. } => "not_owner",
            Self::InvalidCapacity(_) => "invalid_capacity",
            Self::Unavailable(_) => "unavailable",
        }
    }
}
