//! Lifecycle hooks for game-logic modules.
//!
//! Huddle doesn't know what a game does with a room. Modules that keep
//! their own per-room state (a match, a chat log, a scoreboard) implement
//! [`RoomHooks`] and register it on the server builder. The coordinator
//! calls every registered hook after the matching transition has
//! completed.
//!
//! # Data maps
//!
//! | hook           | keys                                                        |
//! |----------------|-------------------------------------------------------------|
//! | `room_created` | `room_id`, `owner_id`, `permission`, `max_size`, `min_players`, `created_at` |
//! | `room_joined`  | `room_id`, `session_id`, `user_id`, `owner_id`, `current_size`, `max_size` |
//! | `leave_room`   | `room_id`, `session_id`, `user_id`                           |
//! | `room_closed`  | `room_id`, `reason`, `members`                               |
//!
//! Hooks run inline on the task that caused the transition, so they
//! should return quickly; spawn a task for anything slow.

use serde_json::{Map, Value};

/// The payload handed to every hook.
pub type HookData = Map<String, Value>;

/// Callbacks fired on room transitions. Every method defaults to a no-op.
///
/// ```rust
/// use huddle::{HookData, RoomHooks};
///
/// struct Audit;
///
/// impl RoomHooks for Audit {
///     fn room_closed(&self, data: &HookData) {
///         println!("room {} closed: {}", data["room_id"], data["reason"]);
///     }
/// }
/// ```
pub trait RoomHooks: Send + Sync + 'static {
    fn room_created(&self, _data: &HookData) {}

    fn room_joined(&self, _data: &HookData) {}

    fn leave_room(&self, _data: &HookData) {}

    fn room_closed(&self, _data: &HookData) {}
}

/// Turns a JSON object into hook data. Anything else yields an empty map.
pub(crate) fn hook_data(value: Value) -> HookData {
    match value {
        Value::Object(map) => map,
        _ => HookData::new(),
    }
}
