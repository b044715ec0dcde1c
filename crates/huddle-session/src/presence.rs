//! Per-user online / last-seen tracking.

use std::collections::BTreeSet;
use std::sync::Arc;

use huddle_cache::{CacheBackend, MemoryBackend, SecureCache};
use huddle_protocol::{RoomId, UserId};

use crate::session::unix_now;
use crate::{Presence, PresenceStatus, SessionStore};

/// Writes and reads presence records.
///
/// Presence is derived from the session store: the room snapshot in each
/// record is the union of the user's local sessions' rooms at the time of
/// the update. Records expire after `presence_ttl` unless refreshed.
pub struct PresenceTracker<B: CacheBackend = MemoryBackend> {
    cache: Arc<SecureCache<B>>,
    sessions: Arc<SessionStore<B>>,
}

impl<B: CacheBackend> PresenceTracker<B> {
    pub fn new(cache: Arc<SecureCache<B>>, sessions: Arc<SessionStore<B>>) -> Self {
        Self { cache, sessions }
    }

    fn key(&self, user_id: &UserId) -> String {
        self.cache.key("presence", &[user_id.as_str()])
    }

    /// Rebuilds and stores `user_id`'s presence with `status`.
    pub async fn update(&self, user_id: &UserId, status: PresenceStatus) -> bool {
        let rooms = match status {
            PresenceStatus::Offline => BTreeSet::new(),
            _ => self.sessions.rooms_for_user(user_id).await,
        };
        let presence = Presence {
            user_id: user_id.clone(),
            status,
            last_seen: unix_now(),
            rooms,
        };
        let ttl = self.sessions.config().presence_ttl;
        let stored = self.cache.set(&self.key(user_id), &presence, Some(ttl)).await;
        tracing::debug!(%user_id, ?status, stored, "presence updated");
        stored
    }

    pub async fn get(&self, user_id: &UserId) -> Option<Presence> {
        self.cache.get(&self.key(user_id)).await
    }

    /// Presence of every user currently in `room_id`. Members without a
    /// presence record are skipped.
    pub async fn get_room_presence(&self, room_id: &RoomId) -> Vec<Presence> {
        let mut users = BTreeSet::new();
        for session_id in self.sessions.rooms().members(room_id).await {
            if let Some(session) = self.sessions.get(&session_id).await {
                users.insert(session.user_id);
            }
        }

        let mut found = Vec::with_capacity(users.len());
        for user_id in users {
            if let Some(presence) = self.get(&user_id).await {
                found.push(presence);
            }
        }
        found
    }
}
