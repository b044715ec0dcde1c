//! The connection coordinator: turns inbound events into state
//! transitions and outbound events.
//!
//! ```text
//!                     ┌──────────────── ConnectionCoordinator ────────────────┐
//! ClientEvent ──────▶ │ RateLimiter → SessionStore / RoomRegistry → replies   │ ──▶ own outbox
//!                     │                     │                                 │
//!                     │                     ├──▶ BroadcastDispatcher ─────────│ ──▶ other outboxes
//!                     │                     ├──▶ PresenceTracker              │
//!                     │                     └──▶ RoomHooks                    │
//! Sweeper ──────────▶ │ sweep() → evict() → close_room()                      │
//!                     └───────────────────────────────────────────────────────┘
//! ```
//!
//! Request handlers and the sweeper go through the same `close_room`
//! path, so a room closed by TTL and a room deleted by its owner look the
//! same to clients and hooks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use huddle_cache::{CacheBackend, MemoryBackend, SecureCache};
use huddle_protocol::{ClientEvent, CreateRoomRequest, RoomId, ServerEvent, SessionId};
use huddle_room::{
    CreateOutcome, EvictionCause, EvictionGuard, JoinOutcome, Joiner, NewRoom, Room, RoomConfig,
    RoomRegistry,
};
use huddle_session::{
    Authenticator, PresenceStatus, PresenceTracker, RateLimitConfig, RateLimiter, Session,
    SessionConfig, SessionError, SessionStore, TokenKind,
};
use serde_json::json;

use crate::broadcast::{BroadcastDispatcher, Inbox};
use crate::hooks::{HookData, RoomHooks, hook_data};
use crate::HuddleError;

/// Token registry type holding revoked tokens.
pub const REVOKED_TOKENS: &str = "revoked";

/// Settings for every component the coordinator owns.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    pub room: RoomConfig,
    pub session: SessionConfig,
    pub rate_limits: RateLimitConfig,
}

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rooms closed because their TTL ran out.
    pub expired: usize,
    /// Empty rooms closed for staleness.
    pub stale: usize,
    /// Revoked-token index entries dropped.
    pub tokens: usize,
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    RoomCreated,
    RoomJoined,
    LeaveRoom,
    RoomClosed,
}

/// Wires the cache, registry, sessions, presence, rate limiter, and
/// broadcaster together.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct ConnectionCoordinator<A: Authenticator, B: CacheBackend = MemoryBackend> {
    auth: A,
    cache: Arc<SecureCache<B>>,
    rooms: Arc<RoomRegistry<B>>,
    sessions: Arc<SessionStore<B>>,
    presence: PresenceTracker<B>,
    limiter: RateLimiter<B>,
    broadcast: BroadcastDispatcher<B>,
    hooks: Vec<Arc<dyn RoomHooks>>,
}

impl<A: Authenticator, B: CacheBackend> ConnectionCoordinator<A, B> {
    pub fn new(auth: A, cache: Arc<SecureCache<B>>, config: CoordinatorConfig) -> Self {
        let rooms = Arc::new(RoomRegistry::new(Arc::clone(&cache), config.room));
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&cache),
            Arc::clone(&rooms),
            config.session,
        ));
        Self {
            auth,
            presence: PresenceTracker::new(Arc::clone(&cache), Arc::clone(&sessions)),
            limiter: RateLimiter::new(Arc::clone(&cache), config.rate_limits),
            broadcast: BroadcastDispatcher::new(Arc::clone(&rooms)),
            cache,
            rooms,
            sessions,
            hooks: Vec::new(),
        }
    }

    /// Registers a lifecycle hook. Hooks fire in registration order.
    pub fn with_hook(mut self, hook: Arc<dyn RoomHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn cache(&self) -> &Arc<SecureCache<B>> {
        &self.cache
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry<B>> {
        &self.rooms
    }

    pub fn sessions(&self) -> &Arc<SessionStore<B>> {
        &self.sessions
    }

    pub fn presence(&self) -> &PresenceTracker<B> {
        &self.presence
    }

    pub fn broadcast(&self) -> &BroadcastDispatcher<B> {
        &self.broadcast
    }

    fn fire(&self, hook: Hook, data: HookData) {
        for h in &self.hooks {
            match hook {
                Hook::RoomCreated => h.room_created(&data),
                Hook::RoomJoined => h.room_joined(&data),
                Hook::LeaveRoom => h.leave_room(&data),
                Hook::RoomClosed => h.room_closed(&data),
            }
        }
    }

    // =====================================================================
    // Connection lifecycle
    // =====================================================================

    /// Registers a new connection and returns the inbox its writer task
    /// drains.
    pub async fn connect(&self, session_id: SessionId) -> Inbox {
        let inbox = self.broadcast.register(session_id.clone()).await;
        self.sessions.on_connect(session_id).await;
        inbox
    }

    /// Tears a connection down: closes its outbox, leaves every room it
    /// was in (telling the remaining members), and drops its session.
    pub async fn disconnect(&self, session_id: &SessionId) {
        self.broadcast.unregister(session_id).await;
        let Some(session) = self.sessions.on_disconnect(session_id).await else {
            return;
        };
        for room_id in &session.rooms {
            self.announce_leave(room_id, &session).await;
        }
        if session.authenticated {
            let status = if self.sessions.sessions_for_user(&session.user_id).await.is_empty() {
                PresenceStatus::Offline
            } else {
                PresenceStatus::Online
            };
            self.presence.update(&session.user_id, status).await;
        }
    }

    /// Resolves `token` through the authenticator and attaches the
    /// identity to the session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::TokenRevoked`] if the token was revoked
    /// - [`SessionError::AuthFailed`] if the authenticator rejects it
    /// - [`SessionError::NotFound`] if the session is not connected
    pub async fn authenticate(
        &self,
        session_id: &SessionId,
        token: &str,
    ) -> Result<Session, SessionError> {
        if self.cache.is_token_valid(REVOKED_TOKENS, token).await {
            tracing::info!(%session_id, "revoked token presented");
            return Err(SessionError::TokenRevoked);
        }
        let claims = self
            .auth
            .verify(token, TokenKind::Access)
            .await
            .ok_or_else(|| SessionError::AuthFailed("token did not verify".into()))?;
        let session = self
            .sessions
            .on_authenticate(session_id, claims.user_id, claims.roles)
            .await?;
        self.presence
            .update(&session.user_id, PresenceStatus::Online)
            .await;
        Ok(session)
    }

    /// Adds `token` to the revoked-token registry for `ttl`. Later
    /// `authenticate` calls with it fail.
    pub async fn revoke_token(&self, token: &str, ttl: Duration) -> bool {
        self.cache.store_token(REVOKED_TOKENS, token, ttl).await
    }

    // =====================================================================
    // Inbound events
    // =====================================================================

    /// Rate-limits, then routes one inbound event. Returns the replies for
    /// the sender; events for other sessions are broadcast directly.
    pub async fn dispatch(&self, session_id: &SessionId, event: ClientEvent) -> Vec<ServerEvent> {
        if !self
            .limiter
            .allow(session_id.as_str(), event.rate_limit_type())
            .await
        {
            return vec![ServerEvent::refusal(&event, "rate_limited")];
        }
        self.sessions.record_activity(session_id).await;
        tracing::debug!(%session_id, event = event.name(), "dispatching event");

        match event {
            ClientEvent::Authenticate { token } => {
                vec![match self.authenticate(session_id, &token).await {
                    Ok(session) => ServerEvent::Authenticated {
                        session_id: session.session_id,
                        user_id: session.user_id,
                        roles: session.roles,
                    },
                    Err(e) => {
                        tracing::debug!(%session_id, error = %e, "authentication refused");
                        ServerEvent::AuthError {
                            error: e.code().into(),
                        }
                    }
                }]
            }
            ClientEvent::CreateRoom(req) => self.create_room(session_id, req).await,
            ClientEvent::JoinRoom { room_id, password } => {
                vec![self.join_room(session_id, &room_id, password.as_deref()).await]
            }
            ClientEvent::LeaveRoom { room_id } => vec![self.leave_room(session_id, &room_id).await],
            ClientEvent::GetPublicRooms {} => vec![self.public_rooms().await],
            ClientEvent::Heartbeat {} => vec![self.heartbeat(session_id).await],
        }
    }

    /// [`dispatch`](Self::dispatch), then queues the replies on the
    /// sender's outbox.
    pub async fn handle_event(&self, session_id: &SessionId, event: ClientEvent) {
        for reply in self.dispatch(session_id, event).await {
            self.broadcast.to_session(session_id, reply).await;
        }
    }

    /// Creates a room owned by the session's user and joins the session to
    /// it. Replies `create_room_success` then `room_joined`; creating an
    /// existing room id joins that room instead.
    pub async fn create_room(
        &self,
        session_id: &SessionId,
        req: CreateRoomRequest,
    ) -> Vec<ServerEvent> {
        let Some(session) = self.sessions.get(session_id).await else {
            return vec![ServerEvent::CreateRoomError {
                error: SessionError::NotFound(session_id.clone()).code().into(),
            }];
        };
        let password = req.password.clone();

        let created = match NewRoom::from_request(req, session.user_id.clone()) {
            Ok(new) => self.rooms.create_room(new).await,
            Err(e) => Err(e),
        };
        let room = match created {
            Ok(CreateOutcome::Created(room)) => {
                self.fire(Hook::RoomCreated, room_created_data(&room));
                room
            }
            Ok(CreateOutcome::Existing(room)) => room,
            Err(e) => {
                tracing::debug!(%session_id, error = %e, "create_room refused");
                return vec![ServerEvent::CreateRoomError {
                    error: e.code().into(),
                }];
            }
        };

        let joined = match self.join_session(&session, &room.room_id, password.as_deref()).await {
            JoinOutcome::Joined(m) | JoinOutcome::AlreadyJoined(m) => {
                ServerEvent::RoomJoined(m.details())
            }
            JoinOutcome::Rejected(rejection) => ServerEvent::JoinRoomError {
                error: rejection.as_str().into(),
            },
        };
        vec![
            ServerEvent::CreateRoomSuccess {
                room_id: room.room_id,
                owner_id: room.owner_id,
                max_size: room.max_size,
                min_players: room.min_players,
            },
            joined,
        ]
    }

    /// Joins the session to `room_id`, creating a public room if none
    /// exists.
    pub async fn join_room(
        &self,
        session_id: &SessionId,
        room_id: &RoomId,
        password: Option<&str>,
    ) -> ServerEvent {
        let Some(session) = self.sessions.get(session_id).await else {
            return ServerEvent::JoinRoomError {
                error: SessionError::NotFound(session_id.clone()).code().into(),
            };
        };
        match self.join_session(&session, room_id, password).await {
            JoinOutcome::Joined(m) => ServerEvent::JoinRoomSuccess(m.details()),
            JoinOutcome::AlreadyJoined(m) => ServerEvent::AlreadyJoined(m.details()),
            JoinOutcome::Rejected(rejection) => ServerEvent::JoinRoomError {
                error: rejection.as_str().into(),
            },
        }
    }

    async fn join_session(
        &self,
        session: &Session,
        room_id: &RoomId,
        password: Option<&str>,
    ) -> JoinOutcome {
        let joiner = Joiner {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            roles: session.roles.clone(),
        };
        let outcome = self.rooms.join(room_id, &joiner, password).await;
        match &outcome {
            JoinOutcome::Joined(membership) => {
                self.sessions.add_room(&session.session_id, room_id).await;
                self.broadcast
                    .to_room_except(
                        room_id,
                        &session.session_id,
                        ServerEvent::MemberJoined {
                            room_id: room_id.clone(),
                            session_id: session.session_id.clone(),
                            user_id: session.user_id.clone(),
                        },
                    )
                    .await;
                let data = serde_json::to_value(membership.details())
                    .map(hook_data)
                    .unwrap_or_default();
                self.fire(Hook::RoomJoined, data);
                if session.authenticated {
                    self.presence
                        .update(&session.user_id, PresenceStatus::Online)
                        .await;
                }
            }
            JoinOutcome::AlreadyJoined(_) => {
                self.sessions.add_room(&session.session_id, room_id).await;
            }
            JoinOutcome::Rejected(_) => {}
        }
        outcome
    }

    /// Removes the session from `room_id` and tells the remaining members.
    pub async fn leave_room(&self, session_id: &SessionId, room_id: &RoomId) -> ServerEvent {
        let Some(session) = self.sessions.get(session_id).await else {
            return ServerEvent::LeaveRoomError {
                error: SessionError::NotFound(session_id.clone()).code().into(),
            };
        };
        let left = self.rooms.leave(room_id, session_id).await;
        // Also repairs a session that still lists a room it is not in.
        self.sessions.remove_room(session_id, room_id).await;
        if !left {
            return ServerEvent::LeaveRoomError {
                error: "not_in_room".into(),
            };
        }

        self.announce_leave(room_id, &session).await;
        if session.authenticated {
            self.presence
                .update(&session.user_id, PresenceStatus::Online)
                .await;
        }
        ServerEvent::LeaveRoomSuccess {
            room_id: room_id.clone(),
            session_id: session_id.clone(),
        }
    }

    async fn announce_leave(&self, room_id: &RoomId, session: &Session) {
        self.broadcast
            .to_room(
                room_id,
                ServerEvent::MemberLeft {
                    room_id: room_id.clone(),
                    session_id: session.session_id.clone(),
                    user_id: session.user_id.clone(),
                },
            )
            .await;
        self.fire(
            Hook::LeaveRoom,
            hook_data(json!({
                "room_id": room_id,
                "session_id": session.session_id,
                "user_id": session.user_id,
            })),
        );
    }

    pub async fn public_rooms(&self) -> ServerEvent {
        let data = self.rooms.public_rooms().await;
        ServerEvent::GetPublicRoomsSuccess {
            count: data.len(),
            data,
        }
    }

    /// Refreshes presence and acknowledges. Session activity was already
    /// recorded by [`dispatch`](Self::dispatch).
    pub async fn heartbeat(&self, session_id: &SessionId) -> ServerEvent {
        if let Some(session) = self.sessions.get(session_id).await {
            if session.authenticated {
                self.presence
                    .update(&session.user_id, PresenceStatus::Online)
                    .await;
            }
        }
        ServerEvent::HeartbeatAck {
            server_time: unix_millis(),
        }
    }

    // =====================================================================
    // Eviction
    // =====================================================================

    /// The one path every room closure takes: announce `room_closed` to
    /// the members, remove them, purge the room, fire `room_closed` hooks.
    /// Returns the sessions that were removed.
    pub async fn close_room(&self, guard: EvictionGuard) -> BTreeSet<SessionId> {
        let room_id = guard.room_id().clone();
        let reason = guard.cause().reason();

        let notice = ServerEvent::RoomClosed {
            room_id: room_id.clone(),
            reason: reason.into(),
            timestamp: unix_secs(),
        };
        let notified = self.broadcast.to_sessions(guard.members(), &notice).await;

        let members = self.rooms.finish_eviction(guard).await;
        for session_id in &members {
            self.sessions.remove_room(session_id, &room_id).await;
        }
        self.fire(
            Hook::RoomClosed,
            hook_data(json!({
                "room_id": room_id,
                "reason": reason,
                "members": members,
            })),
        );
        tracing::info!(%room_id, reason, notified, "room closed");
        members
    }

    /// Evicts `room_id` if `cause` still applies. Returns `false` when the
    /// room is gone or was renewed in the meantime.
    pub async fn evict(&self, room_id: &RoomId, cause: EvictionCause) -> bool {
        match self.rooms.begin_eviction(room_id, cause).await {
            Some(guard) => {
                self.close_room(guard).await;
                true
            }
            None => false,
        }
    }

    /// Owner-requested delete, closed with reason `deleted`.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] for an unknown session;
    /// [`RoomError::NotOwner`](huddle_room::RoomError::NotOwner) or
    /// [`RoomError::NotFound`](huddle_room::RoomError::NotFound) from the
    /// registry.
    pub async fn delete_room(
        &self,
        session_id: &SessionId,
        room_id: &RoomId,
    ) -> Result<BTreeSet<SessionId>, HuddleError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        let guard = self.rooms.delete_room(room_id, &session.user_id).await?;
        Ok(self.close_room(guard).await)
    }

    /// One background pass: close expired rooms, then stale rooms, then
    /// drop expired entries from the revoked-token index.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for room_id in self.rooms.expired_rooms().await {
            if self.evict(&room_id, EvictionCause::Expired).await {
                report.expired += 1;
            }
        }
        for room_id in self.rooms.stale_rooms().await {
            if self.evict(&room_id, EvictionCause::Stale).await {
                report.stale += 1;
            }
        }
        report.tokens = self.cache.sweep_expired(REVOKED_TOKENS).await;
        report
    }
}

fn room_created_data(room: &Room) -> HookData {
    hook_data(json!({
        "room_id": room.room_id,
        "owner_id": room.owner_id,
        "permission": room.permission,
        "max_size": room.max_size,
        "min_players": room.min_players,
        "created_at": room.created_at,
    }))
}

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn unix_secs() -> u64 {
    since_epoch().as_secs()
}

fn unix_millis() -> u64 {
    u64::try_from(since_epoch().as_millis()).unwrap_or(u64::MAX)
}
