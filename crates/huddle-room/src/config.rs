//! Room registry configuration.

use std::time::Duration;

/// Settings shared by every room a registry manages.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Capacity used when `create_room` does not specify one.
    pub default_max_size: usize,

    /// Minimum players used when `create_room` does not specify one.
    pub default_min_players: usize,

    /// Upper bound on any room's capacity.
    pub max_size_limit: usize,

    /// How long a room lives without a successful join. Every join
    /// resets the clock; leaving does not.
    pub room_ttl: Duration,

    /// Empty rooms older than this are purged by the staleness sweep even
    /// before their TTL runs out.
    pub stale_after: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            default_max_size: 8,
            default_min_players: 2,
            max_size_limit: 100,
            room_ttl: Duration::from_secs(3600),
            stale_after: Duration::from_secs(300),
        }
    }
}
