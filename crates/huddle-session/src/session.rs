//! Session and presence records, and the settings that govern them.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use huddle_protocol::{RoomId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Session and presence lifetimes.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session record survives in the cache without activity.
    /// Every `record_activity` renews it.
    pub session_ttl: Duration,

    /// How long a presence record survives without a refresh.
    pub presence_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(1800),
            presence_ttl: Duration::from_secs(300),
        }
    }
}

/// One live connection's identity and room memberships.
///
/// Stored sealed at `session:<session_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    /// The connection id until the session authenticates.
    pub user_id: UserId,
    pub authenticated: bool,
    #[serde(default)]
    pub rooms: BTreeSet<RoomId>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Unix seconds.
    pub connected_at: u64,
    /// Unix seconds.
    pub last_activity: u64,
}

impl Session {
    pub(crate) fn connected(session_id: SessionId) -> Self {
        let now = unix_now();
        Self {
            user_id: UserId::new(session_id.as_str()),
            session_id,
            authenticated: false,
            rooms: BTreeSet::new(),
            roles: BTreeSet::new(),
            connected_at: now,
            last_activity: now,
        }
    }
}

/// Coarse online state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// Derived online/last-seen record for a user, stored sealed at
/// `presence:<user_id>`. Not authoritative; rebuilt on every activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: UserId,
    pub status: PresenceStatus,
    /// Unix seconds.
    pub last_seen: u64,
    #[serde(default)]
    pub rooms: BTreeSet<RoomId>,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
