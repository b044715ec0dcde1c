//! The room registry: the in-process arena of rooms, backed by the cache.
//!
//! # Sources of truth
//!
//! - The arena (`rooms`) is the fast path and wins for membership: which
//!   sessions are in a room is read from here.
//! - The cache wins for capacity (the `room:<id>:size` counter is the
//!   only thing capacity checks trust) and for room lifetime: a room is
//!   expired when its metadata key is gone, and a live key's TTL replaces
//!   the local deadline, so renewals made by other processes count. Rooms
//!   this process has not seen yet are hydrated on first use.
//!
//! # Locks
//!
//! - `create_lock` serializes room creation process-wide. It is held only
//!   for the in-process create-or-confirm step, never across a cache call.
//! - Each room has a `lease`. Joins, leaves, and permission updates hold
//!   it shared; creation and eviction hold it exclusively. A join that got
//!   the lease first renews the TTL, and eviction re-validates after
//!   acquiring it, so the renewal cancels the eviction. An eviction that
//!   got the lease first marks the slot evicted, and the waiting join
//!   retries, finds the room gone, and recreates it. A join that finds
//!   the TTL already run out before any sweep got there revives the room
//!   under the exclusive lease, so the join wins in that case too.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use huddle_cache::{CacheBackend, MemoryBackend, SecureCache};
use huddle_protocol::{Permission, RoomId, RoomSummary, SessionId, UserId};
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};
use tokio::time::{Duration, Instant};

use crate::access::{admit, check_access};
use crate::room::unix_now;
use crate::{
    CreateOutcome, EvictionCause, JoinOutcome, JoinRejection, Joiner, Membership, NewRoom,
    PermissionUpdate, Room, RoomConfig, RoomError, RoomInfo, RoomPermissions,
};

/// How many times a join re-resolves a room it found mid-eviction.
const JOIN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lease {
    Active,
    Evicted,
}

struct RoomSlot {
    lease: Arc<RwLock<Lease>>,
    state: Mutex<SlotState>,
}

struct SlotState {
    room: Room,
    permissions: Option<RoomPermissions>,
    members: BTreeSet<SessionId>,
    expires_at: Instant,
    created: Instant,
}

impl RoomSlot {
    fn new(room: Room, permissions: Option<RoomPermissions>, expires_in: Duration) -> Self {
        let now = Instant::now();
        Self {
            lease: Arc::new(RwLock::new(Lease::Active)),
            state: Mutex::new(SlotState {
                room,
                permissions,
                members: BTreeSet::new(),
                expires_at: now + expires_in,
                created: now,
            }),
        }
    }
}

impl SlotState {
    /// Time since the room was created, which for a hydrated room is
    /// earlier than this process first saw it.
    fn age(&self) -> Duration {
        let stored = Duration::from_secs(unix_now().saturating_sub(self.room.created_at));
        self.created.elapsed().max(stored)
    }
}

/// Exclusive hold on a room that is being evicted.
///
/// Obtained from [`RoomRegistry::begin_eviction`]. While it exists no
/// join or leave can touch the room. Pass it to
/// [`RoomRegistry::finish_eviction`] to purge the room; dropping it
/// instead abandons the eviction and leaves the room active.
pub struct EvictionGuard {
    room: Room,
    cause: EvictionCause,
    members: BTreeSet<SessionId>,
    slot: Arc<RoomSlot>,
    lease: OwnedRwLockWriteGuard<Lease>,
}

impl EvictionGuard {
    pub fn room_id(&self) -> &RoomId {
        &self.room.room_id
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn cause(&self) -> EvictionCause {
        self.cause
    }

    /// Sessions in the room when the eviction began.
    pub fn members(&self) -> &BTreeSet<SessionId> {
        &self.members
    }
}

struct RoomKeys {
    meta: String,
    permissions: String,
    size: String,
    members: String,
}

impl RoomKeys {
    fn all(&self) -> [String; 4] {
        [
            self.meta.clone(),
            self.permissions.clone(),
            self.size.clone(),
            self.members.clone(),
        ]
    }
}

/// Tracks every room this process knows about.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct RoomRegistry<B: CacheBackend = MemoryBackend> {
    cache: Arc<SecureCache<B>>,
    config: RoomConfig,
    rooms: RwLock<HashMap<RoomId, Arc<RoomSlot>>>,
    create_lock: Mutex<()>,
}

impl<B: CacheBackend> RoomRegistry<B> {
    pub fn new(cache: Arc<SecureCache<B>>, config: RoomConfig) -> Self {
        Self {
            cache,
            config,
            rooms: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SecureCache<B>> {
        &self.cache
    }

    fn keys(&self, room_id: &RoomId) -> RoomKeys {
        let id = room_id.as_str();
        RoomKeys {
            meta: self.cache.key("room", &[id]),
            permissions: self.cache.key("room_permissions", &[id]),
            size: self.cache.key("room", &[id, "size"]),
            members: self.cache.key("room", &[id, "members"]),
        }
    }

    async fn slot(&self, room_id: &RoomId) -> Option<Arc<RoomSlot>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    // =====================================================================
    // Creation and hydration
    // =====================================================================

    /// Creates a room, or returns the existing one with the same id.
    ///
    /// # Errors
    ///
    /// [`RoomError::InvalidCapacity`] for a bad `max_size`/`min_players`;
    /// [`RoomError::Unavailable`] if the cache could not store the room.
    pub async fn create_room(&self, new: NewRoom) -> Result<CreateOutcome, RoomError> {
        let room_id = new.room_id.clone().unwrap_or_else(generate_room_id);

        if let Some(room) = self.live_room(&room_id).await {
            return Ok(CreateOutcome::Existing(room));
        }
        if let Some(room) = self.hydrate(&room_id).await {
            return Ok(CreateOutcome::Existing(room));
        }

        let (room, permissions) = new.build(room_id.clone(), &self.config)?;

        let (slot, mut lease) = {
            let creation = self.create_lock.lock().await;
            if let Some(existing) = self.slot(&room_id).await {
                drop(creation);
                if let Some(room) = live_room_of(&existing).await {
                    return Ok(CreateOutcome::Existing(room));
                }
                return Err(RoomError::Unavailable(room_id));
            }
            let slot = Arc::new(RoomSlot::new(
                room.clone(),
                Some(permissions.clone()),
                room.ttl,
            ));
            let lease = Arc::clone(&slot.lease).write_owned().await;
            self.rooms
                .write()
                .await
                .insert(room_id.clone(), Arc::clone(&slot));
            (slot, lease)
        };

        let keys = self.keys(&room_id);
        let ttl = Some(room.ttl);
        let stored = self.cache.set(&keys.meta, &room, ttl).await
            && self.cache.set(&keys.permissions, &permissions, ttl).await
            && self.cache.set_counter(&keys.size, 0, ttl).await;

        if !stored {
            *lease = Lease::Evicted;
            self.remove_slot(&room_id, &slot).await;
            self.cache.delete_many(&keys.all()).await;
            tracing::warn!(%room_id, "room creation failed to persist");
            return Err(RoomError::Unavailable(room_id));
        }

        tracing::info!(
            %room_id,
            owner_id = %room.owner_id,
            permission = %room.permission,
            max_size = room.max_size,
            "room created"
        );
        Ok(CreateOutcome::Created(room))
    }

    /// The room in the arena, if present and not evicted.
    async fn live_room(&self, room_id: &RoomId) -> Option<Room> {
        let slot = self.slot(room_id).await?;
        live_room_of(&slot).await
    }

    /// Loads a room another instance created into the arena.
    async fn hydrate(&self, room_id: &RoomId) -> Option<Room> {
        let keys = self.keys(room_id);
        let room: Room = self.cache.get(&keys.meta).await?;
        let permissions: Option<RoomPermissions> = self.cache.get(&keys.permissions).await;
        let remaining = self.cache.ttl(&keys.meta).await.unwrap_or(room.ttl);

        let creation = self.create_lock.lock().await;
        if let Some(existing) = self.slot(room_id).await {
            drop(creation);
            return live_room_of(&existing).await;
        }
        let slot = Arc::new(RoomSlot::new(room.clone(), permissions, remaining));
        self.rooms.write().await.insert(room_id.clone(), slot);
        tracing::debug!(%room_id, "room hydrated from cache");
        Some(room)
    }

    /// Finds the room for a join, creating a public room owned by the
    /// joiner if it exists nowhere.
    async fn resolve_for_join(
        &self,
        room_id: &RoomId,
        joiner: &Joiner,
    ) -> Result<Arc<RoomSlot>, RoomError> {
        if let Some(slot) = self.slot(room_id).await {
            return Ok(slot);
        }
        if self.hydrate(room_id).await.is_none() {
            let new = NewRoom::new(joiner.user_id.clone()).room_id(room_id.clone());
            if let CreateOutcome::Created(_) = self.create_room(new).await? {
                tracing::debug!(%room_id, "room created lazily by join");
            }
        }
        self.slot(room_id)
            .await
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))
    }

    async fn remove_slot(&self, room_id: &RoomId, slot: &Arc<RoomSlot>) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            rooms.remove(room_id);
        }
    }

    // =====================================================================
    // Join / leave
    // =====================================================================

    /// Adds `joiner` to `room_id`.
    ///
    /// Steps: resolve (or lazily create) the room, check the password and
    /// access rules, short-circuit if already a member, take a capacity
    /// slot with compare-and-increment, record membership, renew the TTL.
    pub async fn join(
        &self,
        room_id: &RoomId,
        joiner: &Joiner,
        password: Option<&str>,
    ) -> JoinOutcome {
        for _ in 0..JOIN_ATTEMPTS {
            let slot = match self.resolve_for_join(room_id, joiner).await {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::warn!(%room_id, error = %e, "join could not resolve room");
                    return JoinOutcome::Rejected(JoinRejection::Unavailable);
                }
            };

            let lease = slot.lease.read().await;
            if *lease == Lease::Evicted {
                // Lost the race against an eviction; resolve again.
                continue;
            }
            if self.is_expired(room_id, &slot).await {
                // The size counter lapsed with the room; rebuild it before
                // any capacity check reads it.
                drop(lease);
                self.revive(room_id, &slot).await;
                continue;
            }
            return self.join_slot(&slot, joiner, password).await;
        }

        tracing::warn!(%room_id, "join kept racing evictions");
        JoinOutcome::Rejected(JoinRejection::Unavailable)
    }

    /// The join itself. The caller holds the slot's lease shared.
    async fn join_slot(
        &self,
        slot: &RoomSlot,
        joiner: &Joiner,
        password: Option<&str>,
    ) -> JoinOutcome {
        let (room, permissions, is_member) = {
            let state = slot.state.lock().await;
            (
                state.room.clone(),
                state.permissions.clone(),
                state.members.contains(&joiner.session_id),
            )
        };
        let room_id = room.room_id.clone();
        let keys = self.keys(&room_id);

        if let Err(rejection) = admit(
            permissions.as_ref(),
            &joiner.user_id,
            &joiner.roles,
            password,
        ) {
            tracing::debug!(%room_id, session_id = %joiner.session_id, %rejection, "join refused");
            return JoinOutcome::Rejected(rejection);
        }

        if is_member || !slot.state.lock().await.members.insert(joiner.session_id.clone()) {
            let current_size = self.current_size(&keys, slot).await;
            return JoinOutcome::AlreadyJoined(self.membership(room, joiner, current_size));
        }

        let limit = i64::try_from(room.max_size).unwrap_or(i64::MAX);
        match self.cache.check_and_increment_with_limit(&keys.size, limit).await {
            Ok(true) => {}
            Ok(false) => {
                slot.state.lock().await.members.remove(&joiner.session_id);
                tracing::debug!(%room_id, session_id = %joiner.session_id, "room full");
                return JoinOutcome::Rejected(JoinRejection::RoomFull);
            }
            Err(e) => {
                slot.state.lock().await.members.remove(&joiner.session_id);
                tracing::warn!(%room_id, error = %e, "capacity check failed");
                return JoinOutcome::Rejected(JoinRejection::Unavailable);
            }
        }

        self.cache
            .set_add(&keys.members, joiner.session_id.as_str())
            .await;
        self.renew(slot, &keys, room.ttl).await;

        let current_size = self.current_size(&keys, slot).await;
        tracing::info!(
            %room_id,
            session_id = %joiner.session_id,
            user_id = %joiner.user_id,
            current_size,
            "session joined room"
        );
        JoinOutcome::Joined(self.membership(room, joiner, current_size))
    }

    fn membership(&self, room: Room, joiner: &Joiner, current_size: usize) -> Membership {
        Membership {
            room,
            session_id: joiner.session_id.clone(),
            user_id: joiner.user_id.clone(),
            current_size,
        }
    }

    /// Writes an expired but not yet evicted room back to the cache with a
    /// fresh TTL. The size counter is rebuilt from this process's members.
    /// Metadata goes last, so its presence implies the rest was written.
    async fn revive(&self, room_id: &RoomId, slot: &RoomSlot) {
        let lease = slot.lease.write().await;
        if *lease == Lease::Evicted || !self.is_expired(room_id, slot).await {
            return;
        }
        let (room, permissions, members) = {
            let mut state = slot.state.lock().await;
            state.expires_at = Instant::now() + state.room.ttl;
            (
                state.room.clone(),
                state.permissions.clone(),
                state.members.clone(),
            )
        };

        let keys = self.keys(room_id);
        let ttl = Some(room.ttl);
        self.cache.delete(&keys.members).await;
        for session_id in &members {
            self.cache.set_add(&keys.members, session_id.as_str()).await;
        }
        self.cache.expire(&keys.members, room.ttl).await;

        let size = i64::try_from(members.len()).unwrap_or(i64::MAX);
        let mut stored = self.cache.set_counter(&keys.size, size, ttl).await;
        if let Some(permissions) = &permissions {
            stored = stored && self.cache.set(&keys.permissions, permissions, ttl).await;
        }
        stored = stored && self.cache.set(&keys.meta, &room, ttl).await;
        drop(lease);

        if stored {
            tracing::info!(%room_id, current_size = size, "expired room revived by join");
        } else {
            tracing::warn!(%room_id, "expired room could not be revived");
        }
    }

    /// Resets the eviction clock for the room and all its keys.
    async fn renew(&self, slot: &RoomSlot, keys: &RoomKeys, ttl: Duration) {
        slot.state.lock().await.expires_at = Instant::now() + ttl;
        for key in keys.all() {
            self.cache.expire(&key, ttl).await;
        }
    }

    /// The cached counter, or the local member count if it is unreadable.
    async fn current_size(&self, keys: &RoomKeys, slot: &RoomSlot) -> usize {
        match self.cache.get_counter(&keys.size).await {
            Some(n) => usize::try_from(n).unwrap_or(0),
            None => slot.state.lock().await.members.len(),
        }
    }

    /// Removes `session_id` from `room_id`. Returns `false` if it was not
    /// a member. Leaving does not renew the room's TTL.
    pub async fn leave(&self, room_id: &RoomId, session_id: &SessionId) -> bool {
        let Some(slot) = self.slot(room_id).await else {
            return false;
        };
        let lease = slot.lease.read().await;
        if *lease == Lease::Evicted {
            return false;
        }
        let (removed, remaining) = {
            let mut state = slot.state.lock().await;
            let removed = state.members.remove(session_id);
            let remaining = state.expires_at.saturating_duration_since(Instant::now());
            (removed, remaining)
        };
        if !removed {
            return false;
        }

        let keys = self.keys(room_id);
        self.cache.set_remove(&keys.members, session_id.as_str()).await;
        if let Some(size) = self.cache.decrement(&keys.size).await {
            if size < 0 {
                let ttl = self.cache.ttl(&keys.size).await.or(Some(remaining));
                self.cache.set_counter(&keys.size, 0, ttl).await;
            }
        }
        drop(lease);

        tracing::info!(%room_id, %session_id, "session left room");
        true
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// Runs the access rules for `user_id` against `room_id`'s policy.
    pub async fn check_access(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        roles: &BTreeSet<String>,
    ) -> bool {
        let permissions = match self.slot(room_id).await {
            Some(slot) => slot.state.lock().await.permissions.clone(),
            None => {
                self.cache
                    .get::<RoomPermissions>(&self.keys(room_id).permissions)
                    .await
            }
        };
        check_access(permissions.as_ref(), user_id, roles)
    }

    /// Room metadata, size, and members. `None` once the room is gone.
    pub async fn get_room_info(&self, room_id: &RoomId) -> Option<RoomInfo> {
        let keys = self.keys(room_id);
        if let Some(slot) = self.slot(room_id).await {
            let lease = slot.lease.read().await;
            if *lease == Lease::Evicted {
                return None;
            }
            let (room, members) = {
                let state = slot.state.lock().await;
                (state.room.clone(), state.members.clone())
            };
            let current_size = self.current_size(&keys, &slot).await;
            return Some(RoomInfo {
                room,
                current_size,
                members,
            });
        }

        // Not seen locally: report what the cache knows without adopting it.
        let room: Room = self.cache.get(&keys.meta).await?;
        let members: BTreeSet<SessionId> = self
            .cache
            .set_members(&keys.members)
            .await
            .into_iter()
            .map(SessionId::from)
            .collect();
        let current_size = self
            .cache
            .get_counter(&keys.size)
            .await
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(members.len());
        Some(RoomInfo {
            room,
            current_size,
            members,
        })
    }

    /// Public rooms in this process, oldest first.
    pub async fn public_rooms(&self) -> Vec<RoomSummary> {
        let slots: Vec<(RoomId, Arc<RoomSlot>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let now = Instant::now();
        let mut summaries = Vec::new();
        for (room_id, slot) in slots {
            let (room, expired) = {
                let state = slot.state.lock().await;
                (state.room.clone(), now >= state.expires_at)
            };
            if expired || room.permission != Permission::Public {
                continue;
            }
            let current_size = self.current_size(&self.keys(&room_id), &slot).await;
            summaries.push(
                RoomInfo {
                    room,
                    current_size,
                    members: BTreeSet::new(),
                }
                .summary(),
            );
        }
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        summaries
    }

    /// Sessions currently in `room_id` according to this process.
    pub async fn members(&self, room_id: &RoomId) -> BTreeSet<SessionId> {
        match self.slot(room_id).await {
            Some(slot) => slot.state.lock().await.members.clone(),
            None => BTreeSet::new(),
        }
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    // =====================================================================
    // Owner operations
    // =====================================================================

    /// Changes a room's access policy. Only the owner may do this.
    pub async fn update_permissions(
        &self,
        room_id: &RoomId,
        actor: &UserId,
        update: PermissionUpdate,
    ) -> Result<RoomPermissions, RoomError> {
        let slot = self
            .slot(room_id)
            .await
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;
        let lease = slot.lease.read().await;
        if *lease == Lease::Evicted {
            return Err(RoomError::NotFound(room_id.clone()));
        }

        let (room, permissions, remaining) = {
            let mut state = slot.state.lock().await;
            if state.room.owner_id != *actor {
                return Err(RoomError::NotOwner {
                    room_id: room_id.clone(),
                    user_id: actor.clone(),
                });
            }
            let mut permissions = state.permissions.clone().unwrap_or_else(|| RoomPermissions {
                permission: state.room.permission,
                owner_id: state.room.owner_id.clone(),
                allowed_users: BTreeSet::new(),
                allowed_roles: BTreeSet::new(),
                password: None,
            });
            update.apply(&mut permissions);
            state.room.permission = permissions.permission;
            state.permissions = Some(permissions.clone());
            let remaining = state.expires_at.saturating_duration_since(Instant::now());
            (state.room.clone(), permissions, remaining)
        };

        let keys = self.keys(room_id);
        let ttl = Some(remaining.max(Duration::from_secs(1)));
        let stored = self.cache.set(&keys.meta, &room, ttl).await
            && self.cache.set(&keys.permissions, &permissions, ttl).await;
        if !stored {
            return Err(RoomError::Unavailable(room_id.clone()));
        }
        tracing::info!(%room_id, permission = %permissions.permission, "room permissions updated");
        Ok(permissions)
    }

    /// Starts an owner-requested delete. Finish it with
    /// [`finish_eviction`](Self::finish_eviction).
    pub async fn delete_room(
        &self,
        room_id: &RoomId,
        actor: &UserId,
    ) -> Result<EvictionGuard, RoomError> {
        let owner = self
            .live_room(room_id)
            .await
            .map(|room| room.owner_id)
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;
        if owner != *actor {
            return Err(RoomError::NotOwner {
                room_id: room_id.clone(),
                user_id: actor.clone(),
            });
        }
        self.begin_eviction(room_id, EvictionCause::Deleted)
            .await
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))
    }

    // =====================================================================
    // Eviction
    // =====================================================================

    /// Rooms whose TTL has run out, or whose metadata the cache no longer
    /// holds.
    pub async fn expired_rooms(&self) -> Vec<RoomId> {
        let slots: Vec<(RoomId, Arc<RoomSlot>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut expired = Vec::new();
        for (room_id, slot) in slots {
            if self.is_expired(&room_id, &slot).await {
                expired.push(room_id);
            }
        }
        expired
    }

    /// Syncs the slot's deadline with the cache, then compares it with now.
    /// If the cache cannot be read, the local deadline decides.
    async fn is_expired(&self, room_id: &RoomId, slot: &RoomSlot) -> bool {
        let meta = self.keys(room_id).meta;
        match self.cache.try_exists(&meta).await {
            Ok(false) => return true,
            Ok(true) => {
                if let Ok(Some(remaining)) = self.cache.try_ttl(&meta).await {
                    slot.state.lock().await.expires_at = Instant::now() + remaining;
                }
            }
            Err(e) => {
                tracing::debug!(%room_id, error = %e, "expiry check using local deadline");
            }
        }
        Instant::now() >= slot.state.lock().await.expires_at
    }

    /// Empty rooms older than `stale_after`.
    pub async fn stale_rooms(&self) -> Vec<RoomId> {
        let slots: Vec<(RoomId, Arc<RoomSlot>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut stale = Vec::new();
        for (room_id, slot) in slots {
            if self.is_stale(&room_id, &slot).await {
                stale.push(room_id);
            }
        }
        stale
    }

    /// Empty here, old enough, and empty everywhere: members held by other
    /// processes still count in the shared size counter.
    async fn is_stale(&self, room_id: &RoomId, slot: &RoomSlot) -> bool {
        {
            let state = slot.state.lock().await;
            if !state.members.is_empty() || state.age() < self.config.stale_after {
                return false;
            }
        }
        matches!(
            self.cache.try_get_counter(&self.keys(room_id).size).await,
            Ok(None) | Ok(Some(..=0))
        )
    }

    /// Takes exclusive hold of a room for eviction.
    ///
    /// Waits for in-flight joins and leaves to finish, then re-checks
    /// `cause`. Returns `None` if the room is already gone or no longer
    /// qualifies (a join renewed it, or someone joined a stale room);
    /// calling this twice for the same room is harmless.
    pub async fn begin_eviction(
        &self,
        room_id: &RoomId,
        cause: EvictionCause,
    ) -> Option<EvictionGuard> {
        let slot = self.slot(room_id).await?;
        let lease = Arc::clone(&slot.lease).write_owned().await;
        if *lease == Lease::Evicted {
            return None;
        }

        let still_applies = match cause {
            EvictionCause::Expired => self.is_expired(room_id, &slot).await,
            EvictionCause::Stale => self.is_stale(room_id, &slot).await,
            EvictionCause::Deleted => true,
        };
        if !still_applies {
            tracing::debug!(%room_id, reason = cause.reason(), "eviction cancelled, room renewed");
            return None;
        }

        let (room, members) = {
            let state = slot.state.lock().await;
            (state.room.clone(), state.members.clone())
        };
        Some(EvictionGuard {
            room,
            cause,
            members,
            slot,
            lease,
        })
    }

    /// Purges the room held by `guard` from the arena and the cache.
    /// Returns the sessions that were removed from it.
    pub async fn finish_eviction(&self, guard: EvictionGuard) -> BTreeSet<SessionId> {
        let EvictionGuard {
            room,
            cause,
            slot,
            mut lease,
            ..
        } = guard;
        let room_id = room.room_id;

        *lease = Lease::Evicted;
        let members = std::mem::take(&mut slot.state.lock().await.members);
        self.remove_slot(&room_id, &slot).await;
        let purged = self.cache.delete_many(&self.keys(&room_id).all()).await;
        drop(lease);

        tracing::info!(
            %room_id,
            reason = cause.reason(),
            members = members.len(),
            purged_keys = purged,
            "room evicted"
        );
        members
    }
}

async fn live_room_of(slot: &RoomSlot) -> Option<Room> {
    let lease = slot.lease.read().await;
    if *lease == Lease::Evicted {
        return None;
    }
    Some(slot.state.lock().await.room.clone())
}

fn generate_room_id() -> RoomId {
    RoomId(format!("room-{:016x}", rand::random::<u64>()))
}
