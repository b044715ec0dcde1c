//! Core protocol types for Huddle's wire format.
//!
//! Every frame on the wire is an "adjacently tagged" JSON object:
//!
//! ```text
//! { "event": "join_room", "data": { "room_id": "lobby", "password": null } }
//! ```
//!
//! `event` names the variant in snake_case; `data` carries its fields and
//! is always an object, even when empty (`"data": {}`).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

// All three identifiers are opaque strings on the wire. Wrapping them keeps
// a `RoomId` from being passed where a `SessionId` is expected.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Identifies a room (a lobby). Caller-supplied or generated.
    RoomId
}

string_id! {
    /// Identifies one live connection. Assigned by the transport.
    SessionId
}

string_id! {
    /// Identifies a user. Resolved from an authentication token; before
    /// authentication it equals the connection's session id.
    UserId
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

/// Who may join a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Anyone may join.
    #[default]
    Public,
    /// Only the owner, allow-listed users or roles, or password holders.
    Private,
}

/// Returned when parsing a permission string other than `public` or
/// `private`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission '{0}' (expected 'public' or 'private')")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(UnknownPermission(other.to_string())),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Public => "public",
            Self::Private => "private",
        })
    }
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Payload of `create_room`.
///
/// `permission` stays a string here so an unknown value can be answered
/// with `create_room_error` instead of failing frame decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    /// Generated when absent.
    #[serde(default)]
    pub room_id: Option<RoomId>,
    /// `"public"` (default) or `"private"`.
    #[serde(default)]
    pub permission: Option<String>,
    /// Kept only for private rooms.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_players: Option<usize>,
    #[serde(default)]
    pub min_players: Option<usize>,
    #[serde(default)]
    pub allowed_users: BTreeSet<UserId>,
    #[serde(default)]
    pub allowed_roles: BTreeSet<String>,
}

/// Events a client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Attach an authenticated identity to this connection.
    Authenticate { token: String },

    CreateRoom(CreateRoomRequest),

    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        password: Option<String>,
    },

    LeaveRoom { room_id: RoomId },

    GetPublicRooms {},

    /// Keep-alive. Refreshes session activity and presence.
    Heartbeat {},
}

impl ClientEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::CreateRoom(_) => "create_room",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::GetPublicRooms {} => "get_public_rooms",
            Self::Heartbeat {} => "heartbeat",
        }
    }

    /// The rate-limit bucket this event is counted against.
    pub fn rate_limit_type(&self) -> &'static str {
        match self {
            Self::CreateRoom(_) => "create_room",
            Self::JoinRoom { .. } => "join_room",
            _ => "message",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// The payload shared by `room_joined`, `join_room_success`, and
/// `already_joined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDetails {
    pub room_id: RoomId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub owner_id: UserId,
    pub current_size: usize,
    pub max_size: usize,
}

/// One entry of `get_public_rooms_success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub owner_id: UserId,
    pub permission: Permission,
    pub current_size: usize,
    pub max_size: usize,
    pub min_size: usize,
    /// Unix seconds.
    pub created_at: u64,
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        session_id: SessionId,
        user_id: UserId,
        roles: BTreeSet<String>,
    },
    AuthError {
        error: String,
    },

    CreateRoomSuccess {
        room_id: RoomId,
        owner_id: UserId,
        max_size: usize,
        min_players: usize,
    },
    CreateRoomError {
        error: String,
    },

    /// Sent to the creator right after `create_room_success`.
    RoomJoined(JoinDetails),
    JoinRoomSuccess(JoinDetails),
    AlreadyJoined(JoinDetails),
    JoinRoomError {
        error: String,
    },

    LeaveRoomSuccess {
        room_id: RoomId,
        session_id: SessionId,
    },
    LeaveRoomError {
        error: String,
    },

    GetPublicRoomsSuccess {
        data: Vec<RoomSummary>,
        count: usize,
    },

    /// Broadcast to a room's members right before they are removed.
    /// `reason` is `ttl_expired`, `stale`, or `deleted`; `timestamp` is
    /// unix seconds.
    RoomClosed {
        room_id: RoomId,
        reason: String,
        timestamp: u64,
    },

    /// Broadcast to the other members when someone joins.
    MemberJoined {
        room_id: RoomId,
        session_id: SessionId,
        user_id: UserId,
    },
    /// Broadcast to the remaining members when someone leaves.
    MemberLeft {
        room_id: RoomId,
        session_id: SessionId,
        user_id: UserId,
    },

    /// `server_time` is unix milliseconds.
    HeartbeatAck {
        server_time: u64,
    },

    /// A frame that could not be decoded or dispatched.
    Error {
        error: String,
    },
}

impl ServerEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::AuthError { .. } => "auth_error",
            Self::CreateRoomSuccess { .. } => "create_room_success",
            Self::CreateRoomError { .. } => "create_room_error",
            Self::RoomJoined(_) => "room_joined",
            Self::JoinRoomSuccess(_) => "join_room_success",
            Self::AlreadyJoined(_) => "already_joined",
            Self::JoinRoomError { .. } => "join_room_error",
            Self::LeaveRoomSuccess { .. } => "leave_room_success",
            Self::LeaveRoomError { .. } => "leave_room_error",
            Self::GetPublicRoomsSuccess { .. } => "get_public_rooms_success",
            Self::RoomClosed { .. } => "room_closed",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::Error { .. } => "error",
        }
    }

    /// The `*_error` reply matching an inbound event, used when the event
    /// is refused before dispatch.
    pub fn refusal(event: &ClientEvent, error: impl Into<String>) -> Self {
        let error = error.into();
        match event {
            ClientEvent::Authenticate { .. } => Self::AuthError { error },
            ClientEvent::CreateRoom(_) => Self::CreateRoomError { error },
            ClientEvent::JoinRoom { .. } => Self::JoinRoomError { error },
            ClientEvent::LeaveRoom { .. } => Self::LeaveRoomError { error },
            ClientEvent::GetPublicRooms {} | ClientEvent::Heartbeat {} => Self::Error { error },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        assert_eq!(serde_json::to_string(&RoomId::from("r1")).unwrap(), "\"r1\"");
        let sid: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(sid.as_str(), "abc");
        assert_eq!(UserId::new("u").to_string(), "u");
    }

    #[test]
    fn test_permission_parse_and_display() {
        assert_eq!("public".parse::<Permission>(), Ok(Permission::Public));
        assert_eq!("private".parse::<Permission>(), Ok(Permission::Private));
        assert!("secret".parse::<Permission>().is_err());
        assert_eq!(Permission::Private.to_string(), "private");
        assert_eq!(serde_json::to_value(Permission::Public).unwrap(), json!("public"));
    }

    #[test]
    fn test_client_event_create_room_minimal_payload() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "create_room", "data": {}})).unwrap();
        assert_eq!(event, ClientEvent::CreateRoom(CreateRoomRequest::default()));
    }

    #[test]
    fn test_client_event_create_room_full_payload() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "create_room",
            "data": {
                "room_id": "r2",
                "permission": "private",
                "password": "secret",
                "max_players": 4,
                "allowed_users": ["bob"],
                "allowed_roles": ["admin"]
            }
        }))
        .unwrap();

        let ClientEvent::CreateRoom(req) = event else {
            panic!("expected create_room");
        };
        assert_eq!(req.room_id, Some(RoomId::from("r2")));
        assert_eq!(req.permission.as_deref(), Some("private"));
        assert_eq!(req.max_players, Some(4));
        assert_eq!(req.min_players, None);
        assert!(req.allowed_users.contains(&UserId::from("bob")));
    }

    #[test]
    fn test_client_event_join_room_password_optional() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "join_room", "data": {"room_id": "r1"}}))
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_id: "r1".into(),
                password: None
            }
        );
    }

    #[test]
    fn test_client_event_empty_payloads() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "get_public_rooms", "data": {}})).unwrap();
        assert_eq!(event, ClientEvent::GetPublicRooms {});
        assert_eq!(event.rate_limit_type(), "message");

        let event: ClientEvent =
            serde_json::from_value(json!({"event": "heartbeat", "data": {}})).unwrap();
        assert_eq!(event.name(), "heartbeat");
    }

    #[test]
    fn test_client_event_unknown_event_returns_error() {
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({"event": "fly_to_moon", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_join_success_json_format() {
        let event = ServerEvent::JoinRoomSuccess(JoinDetails {
            room_id: "r1".into(),
            session_id: "s1".into(),
            user_id: "u1".into(),
            owner_id: "u0".into(),
            current_size: 2,
            max_size: 8,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "join_room_success");
        assert_eq!(value["data"]["current_size"], 2);
        assert_eq!(value["data"]["owner_id"], "u0");
        assert_eq!(event.name(), "join_room_success");
    }

    #[test]
    fn test_server_event_room_closed_json_format() {
        let event = ServerEvent::RoomClosed {
            room_id: "r1".into(),
            reason: "ttl_expired".into(),
            timestamp: 1_700_000_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "room_closed",
                "data": {"room_id": "r1", "reason": "ttl_expired", "timestamp": 1_700_000_000u64}
            })
        );
    }

    #[test]
    fn test_server_event_public_rooms_json_format() {
        let event = ServerEvent::GetPublicRoomsSuccess {
            data: vec![RoomSummary {
                room_id: "r1".into(),
                owner_id: "u0".into(),
                permission: Permission::Public,
                current_size: 1,
                max_size: 8,
                min_size: 2,
                created_at: 10,
            }],
            count: 1,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "get_public_rooms_success");
        assert_eq!(value["data"]["count"], 1);
        assert_eq!(value["data"]["data"][0]["permission"], "public");
        assert_eq!(value["data"]["data"][0]["min_size"], 2);
    }

    #[test]
    fn test_server_event_refusal_matches_inbound_event() {
        let join = ClientEvent::JoinRoom {
            room_id: "r".into(),
            password: None,
        };
        assert_eq!(
            ServerEvent::refusal(&join, "rate_limited"),
            ServerEvent::JoinRoomError {
                error: "rate_limited".into()
            }
        );
        assert_eq!(
            ServerEvent::refusal(&ClientEvent::Heartbeat {}, "rate_limited").name(),
            "error"
        );
    }
}
