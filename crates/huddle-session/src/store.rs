//! The session store: one record per live connection.
//!
//! Records live in an in-process arena (the fast path) and are mirrored,
//! sealed and TTL-scoped, into the cache so other instances and the
//! presence tracker can see them. The two are updated one after the other,
//! not transactionally; a crash between the two writes leaves the cache
//! copy to expire on its own.
//!
//! # Lifecycle
//!
//! ```text
//! on_connect ──▶ [provisional] ──on_authenticate──▶ [authenticated]
//!                     │                                   │
//!                     └────────── on_disconnect ◀─────────┘
//!                                      │
//!                           leave every room, delete record
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use huddle_cache::{CacheBackend, MemoryBackend, SecureCache};
use huddle_protocol::{RoomId, SessionId, UserId};
use huddle_room::RoomRegistry;
use tokio::sync::RwLock;

use crate::session::unix_now;
use crate::{Session, SessionConfig, SessionError};

/// Tracks every session connected to this process.
///
/// Holds the room registry so that a disconnect can cascade into room
/// leaves. Share it behind an `Arc`; all methods take `&self`.
pub struct SessionStore<B: CacheBackend = MemoryBackend> {
    cache: Arc<SecureCache<B>>,
    rooms: Arc<RoomRegistry<B>>,
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl<B: CacheBackend> SessionStore<B> {
    pub fn new(
        cache: Arc<SecureCache<B>>,
        rooms: Arc<RoomRegistry<B>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            cache,
            rooms,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry<B>> {
        &self.rooms
    }

    fn key(&self, session_id: &SessionId) -> String {
        self.cache.key("session", &[session_id.as_str()])
    }

    /// Writes the record to the cache, renewing its TTL.
    async fn persist(&self, session: &Session) -> bool {
        self.cache
            .set(
                &self.key(&session.session_id),
                session,
                Some(self.config.session_ttl),
            )
            .await
    }

    /// Applies `change` to the arena record and mirrors the result.
    async fn modify<F>(&self, session_id: &SessionId, change: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let updated = {
            let mut sessions = self.sessions.write().await;
            let session = sessions.get_mut(session_id)?;
            change(session);
            session.clone()
        };
        self.persist(&updated).await;
        Some(updated)
    }

    /// Registers a new connection with empty room and role sets. Its user
    /// id is the connection id until it authenticates.
    pub async fn on_connect(&self, session_id: SessionId) -> Session {
        let session = Session::connected(session_id.clone());
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session.clone());
        self.persist(&session).await;
        tracing::info!(%session_id, "session connected");
        session
    }

    /// Replaces the provisional identity with a verified one.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session is not connected.
    pub async fn on_authenticate(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        roles: BTreeSet<String>,
    ) -> Result<Session, SessionError> {
        let session = self
            .modify(session_id, |s| {
                s.user_id = user_id;
                s.roles = roles;
                s.authenticated = true;
                s.last_activity = unix_now();
            })
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        tracing::info!(%session_id, user_id = %session.user_id, "session authenticated");
        Ok(session)
    }

    /// Refreshes `last_activity` and renews the record's TTL. Returns
    /// `false` for an unknown session.
    pub async fn record_activity(&self, session_id: &SessionId) -> bool {
        self.modify(session_id, |s| s.last_activity = unix_now())
            .await
            .is_some()
    }

    /// Records that the session joined `room_id`.
    pub async fn add_room(&self, session_id: &SessionId, room_id: &RoomId) -> bool {
        self.modify(session_id, |s| {
            s.rooms.insert(room_id.clone());
        })
        .await
        .is_some()
    }

    /// Records that the session left (or was removed from) `room_id`.
    pub async fn remove_room(&self, session_id: &SessionId, room_id: &RoomId) -> bool {
        self.modify(session_id, |s| {
            s.rooms.remove(room_id);
        })
        .await
        .is_some()
    }

    /// Leaves every room the session is in, then deletes its record.
    /// Returns the removed session, with the rooms it was in.
    pub async fn on_disconnect(&self, session_id: &SessionId) -> Option<Session> {
        let removed = self.sessions.write().await.remove(session_id);
        self.cache.delete(&self.key(session_id)).await;

        let session = removed?;
        for room_id in &session.rooms {
            if !self.rooms.leave(room_id, session_id).await {
                tracing::debug!(%session_id, %room_id, "room already gone at disconnect");
            }
        }
        tracing::info!(
            %session_id,
            user_id = %session.user_id,
            rooms = session.rooms.len(),
            "session disconnected"
        );
        Some(session)
    }

    /// The session as this process knows it.
    pub async fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// The session's cached record, which may belong to another instance.
    pub async fn load(&self, session_id: &SessionId) -> Option<Session> {
        self.cache.get(&self.key(session_id)).await
    }

    /// Every local session belonging to `user_id`.
    pub async fn sessions_for_user(&self, user_id: &UserId) -> Vec<SessionId> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == *user_id)
            .map(|s| s.session_id.clone())
            .collect()
    }

    /// Union of the rooms of every local session belonging to `user_id`.
    pub async fn rooms_for_user(&self, user_id: &UserId) -> BTreeSet<RoomId> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == *user_id)
            .flat_map(|s| s.rooms.iter().cloned())
            .collect()
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
