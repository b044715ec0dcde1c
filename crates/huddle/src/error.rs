//! Unified error type for Huddle.

use huddle_cache::CacheError;
use huddle_protocol::ProtocolError;
use huddle_room::RoomError;
use huddle_session::SessionError;
use huddle_transport::TransportError;

/// Any failure surfaced by the server, the coordinator, or cache setup.
///
/// Expected rejections (room full, wrong password) are not errors; they
/// come back as events. This type covers what is left.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    /// A cache construction or backend error.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown session, failed authentication).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error (not found, not owner, bad capacity).
    #[error(transparent)]
    Room(#[from] RoomError),
}
