//! Wire protocol for Huddle.
//!
//! This crate defines what clients and the server say to each other:
//!
//! - **Identity types** ([`RoomId`], [`SessionId`], [`UserId`]) and the
//!   room [`Permission`] level.
//! - **Events** ([`ClientEvent`] inbound, [`ServerEvent`] outbound). Every
//!   frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): events to bytes and back.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (ClientEvent / ServerEvent) → Coordinator
//! ```
//!
//! The protocol layer knows nothing about connections, caches, or rooms.

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientEvent, CreateRoomRequest, JoinDetails, Permission, RoomId, RoomSummary, ServerEvent,
    SessionId, UnknownPermission, UserId,
};
