//! Room records and the values the registry hands back.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use huddle_protocol::{
    CreateRoomRequest, JoinDetails, Permission, RoomId, RoomSummary, SessionId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::{RoomConfig, RoomError};

/// Room metadata, stored sealed at `room:<room_id>`.
///
/// The member count is not part of this record; it lives in its own
/// counter key so joins can increment it atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub owner_id: UserId,
    pub permission: Permission,
    pub max_size: usize,
    pub min_players: usize,
    /// Unix seconds.
    pub created_at: u64,
    pub ttl: Duration,
}

/// Access policy, stored sealed at `room_permissions:<room_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPermissions {
    pub permission: Permission,
    pub owner_id: UserId,
    #[serde(default)]
    pub allowed_users: BTreeSet<UserId>,
    #[serde(default)]
    pub allowed_roles: BTreeSet<String>,
    /// Only ever set for private rooms.
    #[serde(default)]
    pub password: Option<String>,
}

/// Parameters for [`RoomRegistry::create_room`](crate::RoomRegistry::create_room).
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub room_id: Option<RoomId>,
    pub owner_id: UserId,
    pub permission: Permission,
    pub password: Option<String>,
    pub max_size: Option<usize>,
    pub min_players: Option<usize>,
    pub allowed_users: BTreeSet<UserId>,
    pub allowed_roles: BTreeSet<String>,
}

impl NewRoom {
    /// A public room owned by `owner_id` with default settings.
    pub fn new(owner_id: impl Into<UserId>) -> Self {
        Self {
            room_id: None,
            owner_id: owner_id.into(),
            permission: Permission::Public,
            password: None,
            max_size: None,
            min_players: None,
            allowed_users: BTreeSet::new(),
            allowed_roles: BTreeSet::new(),
        }
    }

    /// Builds the parameters from an inbound `create_room` payload.
    ///
    /// # Errors
    /// [`RoomError::InvalidPermission`] if `permission` is not `public`
    /// or `private`.
    pub fn from_request(req: CreateRoomRequest, owner_id: UserId) -> Result<Self, RoomError> {
        let permission = match req.permission.as_deref() {
            None => Permission::Public,
            Some(raw) => raw.parse()?,
        };
        Ok(Self {
            room_id: req.room_id,
            owner_id,
            permission,
            password: req.password,
            max_size: req.max_players,
            min_players: req.min_players,
            allowed_users: req.allowed_users,
            allowed_roles: req.allowed_roles,
        })
    }

    pub fn room_id(mut self, room_id: impl Into<RoomId>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn min_players(mut self, min_players: usize) -> Self {
        self.min_players = Some(min_players);
        self
    }

    pub fn allow_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.allowed_users.insert(user_id.into());
        self
    }

    pub fn allow_role(mut self, role: impl Into<String>) -> Self {
        self.allowed_roles.insert(role.into());
        self
    }

    /// Validates capacity against `config` and splits into the metadata
    /// and permission records. A password on a public room is dropped.
    pub(crate) fn build(
        self,
        room_id: RoomId,
        config: &RoomConfig,
    ) -> Result<(Room, RoomPermissions), RoomError> {
        let max_size = self.max_size.unwrap_or(config.default_max_size);
        if max_size == 0 || max_size > config.max_size_limit {
            return Err(RoomError::InvalidCapacity(format!(
                "max size {max_size} outside 1..={}",
                config.max_size_limit
            )));
        }
        let min_players = match self.min_players {
            Some(min) if min > max_size => {
                return Err(RoomError::InvalidCapacity(format!(
                    "min players {min} exceeds max size {max_size}"
                )));
            }
            Some(min) => min,
            None => config.default_min_players.min(max_size),
        };

        let password = match self.permission {
            Permission::Private => self.password,
            Permission::Public => None,
        };

        let room = Room {
            room_id,
            owner_id: self.owner_id.clone(),
            permission: self.permission,
            max_size,
            min_players,
            created_at: unix_now(),
            ttl: config.room_ttl,
        };
        let permissions = RoomPermissions {
            permission: self.permission,
            owner_id: self.owner_id,
            allowed_users: self.allowed_users,
            allowed_roles: self.allowed_roles,
            password,
        };
        Ok((room, permissions))
    }
}

/// A partial change to a room's access policy. `None` fields are left
/// unchanged; `password: Some(None)` clears the password.
#[derive(Debug, Clone, Default)]
pub struct PermissionUpdate {
    pub permission: Option<Permission>,
    pub allowed_users: Option<BTreeSet<UserId>>,
    pub allowed_roles: Option<BTreeSet<String>>,
    pub password: Option<Option<String>>,
}

impl PermissionUpdate {
    pub(crate) fn apply(self, perms: &mut RoomPermissions) {
        if let Some(permission) = self.permission {
            perms.permission = permission;
        }
        if let Some(users) = self.allowed_users {
            perms.allowed_users = users;
        }
        if let Some(roles) = self.allowed_roles {
            perms.allowed_roles = roles;
        }
        if let Some(password) = self.password {
            perms.password = password;
        }
        if perms.permission == Permission::Public {
            perms.password = None;
        }
    }
}

/// Snapshot returned by `get_room_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room: Room,
    pub current_size: usize,
    pub members: BTreeSet<SessionId>,
}

impl RoomInfo {
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room.room_id.clone(),
            owner_id: self.room.owner_id.clone(),
            permission: self.room.permission,
            current_size: self.current_size,
            max_size: self.room.max_size,
            min_size: self.room.min_players,
            created_at: self.room.created_at,
        }
    }
}

/// The identity a session joins with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joiner {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub roles: BTreeSet<String>,
}

impl Joiner {
    pub fn new(session_id: impl Into<SessionId>, user_id: impl Into<UserId>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }
}

/// A session's place in a room after a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room: Room,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub current_size: usize,
}

impl Membership {
    pub fn details(&self) -> JoinDetails {
        JoinDetails {
            room_id: self.room.room_id.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            owner_id: self.room.owner_id.clone(),
            current_size: self.current_size,
            max_size: self.room.max_size,
        }
    }
}

/// Result of `create_room`. Creating an existing room is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Room),
    Existing(Room),
}

impl CreateOutcome {
    pub fn room(&self) -> &Room {
        match self {
            Self::Created(room) | Self::Existing(room) => room,
        }
    }

    pub fn into_room(self) -> Room {
        match self {
            Self::Created(room) | Self::Existing(room) => room,
        }
    }
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    RoomFull,
    /// Private room with a password, no password supplied, and the user
    /// is not allow-listed.
    PasswordRequired,
    WrongPassword,
    PermissionDenied,
    /// The cache failed mid-join.
    Unavailable,
}

impl JoinRejection {
    /// The `error` string sent in `join_room_error`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoomFull => "room_full",
            Self::PasswordRequired => "password_required",
            Self::WrongPassword => "wrong_password",
            Self::PermissionDenied => "permission_denied",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for JoinRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Membership),
    /// The session was already a member; the size was not incremented.
    AlreadyJoined(Membership),
    Rejected(JoinRejection),
}

/// Why a room is being evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// The room's TTL ran out (or the store dropped its metadata).
    Expired,
    /// Empty for longer than `stale_after`.
    Stale,
    /// The owner deleted it.
    Deleted,
}

impl EvictionCause {
    /// The `reason` carried by `room_closed`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Expired => "ttl_expired",
            Self::Stale => "stale",
            Self::Deleted => "deleted",
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
