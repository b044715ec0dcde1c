//! Room registry for Huddle.
//!
//! Tracks which rooms exist, who may join them, how many members they
//! hold, and when idle rooms are evicted. State lives in an in-process
//! arena backed by the encrypted cache from `huddle-cache`.
//!
//! # Key types
//!
//! - [`RoomRegistry`]: create / join / leave / evict rooms
//! - [`Room`], [`RoomPermissions`]: the stored records
//! - [`JoinOutcome`], [`CreateOutcome`]: discriminated results; expected
//!   refusals are values, not errors
//! - [`EvictionGuard`]: exclusive hold on a room between "announce
//!   closure" and "purge"
//!
//! # Room lifecycle
//!
//! ```text
//! absent ──create/join──▶ active ──TTL / stale / delete──▶ evicted
//!                          │  ▲
//!                          └──┘ join renews TTL
//! ```

mod access;
mod config;
mod error;
mod registry;
mod room;

pub use access::check_access;
pub use config::RoomConfig;
pub use error::RoomError;
pub use registry::{EvictionGuard, RoomRegistry};
pub use room::{
    CreateOutcome, EvictionCause, JoinOutcome, JoinRejection, Joiner, Membership, NewRoom,
    PermissionUpdate, Room, RoomInfo, RoomPermissions,
};
