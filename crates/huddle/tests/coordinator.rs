//! Integration tests for the connection coordinator and the sweeper.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use huddle::prelude::*;
use huddle::{Inbox, SweepReport, spawn_sweeper};
use tokio::sync::watch;

// =========================================================================
// Test authenticator and hook recorder
// =========================================================================

/// Accepts `token-<user>`; `token-admin` also carries the `admin` role.
struct StaticAuth;

impl Authenticator for StaticAuth {
    async fn verify(&self, token: &str, expected: TokenKind) -> Option<Claims> {
        if expected != TokenKind::Access {
            return None;
        }
        let user = token.strip_prefix("token-")?;
        let claims = Claims::new(user);
        Some(if user == "admin" {
            claims.with_roles(["admin".to_string()])
        } else {
            claims
        })
    }
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(&'static str, HookData)>>,
}

impl Recorder {
    fn names(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }

    fn last(&self, name: &str) -> HookData {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, d)| d.clone())
            .unwrap_or_else(|| panic!("no {name} hook recorded"))
    }
}

impl RoomHooks for Recorder {
    fn room_created(&self, data: &HookData) {
        self.calls.lock().unwrap().push(("room_created", data.clone()));
    }

    fn room_joined(&self, data: &HookData) {
        self.calls.lock().unwrap().push(("room_joined", data.clone()));
    }

    fn leave_room(&self, data: &HookData) {
        self.calls.lock().unwrap().push(("leave_room", data.clone()));
    }

    fn room_closed(&self, data: &HookData) {
        self.calls.lock().unwrap().push(("room_closed", data.clone()));
    }
}

// =========================================================================
// Helpers
// =========================================================================

type Coordinator = ConnectionCoordinator<StaticAuth>;

fn short_lived() -> CoordinatorConfig {
    CoordinatorConfig {
        room: RoomConfig {
            room_ttl: Duration::from_secs(60),
            stale_after: Duration::from_secs(30),
            ..RoomConfig::default()
        },
        ..CoordinatorConfig::default()
    }
}

fn coordinator(config: CoordinatorConfig) -> Arc<Coordinator> {
    let cache = Arc::new(SecureCache::in_memory(&EncryptionKey::generate()).unwrap());
    Arc::new(ConnectionCoordinator::new(StaticAuth, cache, config))
}

fn sid(id: &str) -> SessionId {
    SessionId::from(id)
}

fn rid(id: &str) -> RoomId {
    RoomId::from(id)
}

fn drain(inbox: &mut Inbox) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = inbox.try_recv() {
        events.push(event);
    }
    events
}

fn create(room: &str) -> ClientEvent {
    ClientEvent::CreateRoom(CreateRoomRequest {
        room_id: Some(rid(room)),
        ..CreateRoomRequest::default()
    })
}

fn join(room: &str) -> ClientEvent {
    ClientEvent::JoinRoom {
        room_id: rid(room),
        password: None,
    }
}

/// Connects `owner` and `guest`, has `owner` create `room` and `guest`
/// join it, then drains both inboxes.
async fn two_member_room(c: &Coordinator, room: &str) -> (Inbox, Inbox) {
    let mut a = c.connect(sid("a")).await;
    let mut b = c.connect(sid("b")).await;
    c.dispatch(&sid("a"), create(room)).await;
    let reply = c.dispatch(&sid("b"), join(room)).await;
    assert!(matches!(reply[..], [ServerEvent::JoinRoomSuccess(_)]), "{reply:?}");
    drain(&mut a);
    drain(&mut b);
    (a, b)
}

fn count_closed(events: &[ServerEvent], reason: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ServerEvent::RoomClosed { reason: r, .. } if r == reason))
        .count()
}

// =========================================================================
// Rooms
// =========================================================================

#[tokio::test]
async fn test_create_room_replies_success_then_room_joined() {
    let c = coordinator(CoordinatorConfig::default());
    let _inbox = c.connect(sid("a")).await;

    let replies = c.dispatch(&sid("a"), create("lobby")).await;
    assert_eq!(replies.len(), 2);
    match &replies[0] {
        ServerEvent::CreateRoomSuccess {
            room_id,
            owner_id,
            max_size,
            min_players,
        } => {
            assert_eq!(room_id, &rid("lobby"));
            assert_eq!(owner_id, &UserId::from("a"));
            assert_eq!(*max_size, 8);
            assert_eq!(*min_players, 2);
        }
        other => panic!("expected create_room_success, got {other:?}"),
    }
    match &replies[1] {
        ServerEvent::RoomJoined(details) => {
            assert_eq!(details.current_size, 1);
            assert_eq!(details.session_id, sid("a"));
        }
        other => panic!("expected room_joined, got {other:?}"),
    }

    let session = c.sessions().get(&sid("a")).await.unwrap();
    assert!(session.rooms.contains(&rid("lobby")));
}

#[tokio::test]
async fn test_create_room_invalid_permission_is_refused() {
    let c = coordinator(CoordinatorConfig::default());
    let _inbox = c.connect(sid("a")).await;

    let replies = c
        .dispatch(
            &sid("a"),
            ClientEvent::CreateRoom(CreateRoomRequest {
                permission: Some("secret".into()),
                ..CreateRoomRequest::default()
            }),
        )
        .await;
    assert_eq!(
        replies,
        vec![ServerEvent::CreateRoomError {
            error: "invalid_permission".into()
        }]
    );
    assert_eq!(c.rooms().room_count().await, 0);
}

#[tokio::test]
async fn test_join_room_broadcasts_member_joined_to_others() {
    let c = coordinator(CoordinatorConfig::default());
    let mut a = c.connect(sid("a")).await;
    let mut b = c.connect(sid("b")).await;
    c.dispatch(&sid("a"), create("r1")).await;

    let reply = c.dispatch(&sid("b"), join("r1")).await;
    match &reply[..] {
        [ServerEvent::JoinRoomSuccess(details)] => assert_eq!(details.current_size, 2),
        other => panic!("expected join_room_success, got {other:?}"),
    }

    assert_eq!(
        drain(&mut a),
        vec![ServerEvent::MemberJoined {
            room_id: rid("r1"),
            session_id: sid("b"),
            user_id: UserId::from("b"),
        }]
    );
    assert!(drain(&mut b).is_empty(), "joiner gets no member_joined");
}

#[tokio::test]
async fn test_join_room_twice_replies_already_joined() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;
    c.dispatch(&sid("a"), create("r1")).await;

    let reply = c.dispatch(&sid("a"), join("r1")).await;
    match &reply[..] {
        [ServerEvent::AlreadyJoined(details)] => assert_eq!(details.current_size, 1),
        other => panic!("expected already_joined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_join_full_room_is_refused() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;
    let _b = c.connect(sid("b")).await;
    c.dispatch(
        &sid("a"),
        ClientEvent::CreateRoom(CreateRoomRequest {
            room_id: Some(rid("solo")),
            max_players: Some(1),
            min_players: Some(1),
            ..CreateRoomRequest::default()
        }),
    )
    .await;

    let reply = c.dispatch(&sid("b"), join("solo")).await;
    assert_eq!(
        reply,
        vec![ServerEvent::JoinRoomError {
            error: "room_full".into()
        }]
    );
    assert!(c.sessions().get(&sid("b")).await.unwrap().rooms.is_empty());
}

#[tokio::test]
async fn test_leave_room_notifies_remaining_members() {
    let c = coordinator(CoordinatorConfig::default());
    let (mut a, _b) = two_member_room(&c, "r1").await;

    let reply = c.dispatch(&sid("b"), ClientEvent::LeaveRoom { room_id: rid("r1") }).await;
    assert_eq!(
        reply,
        vec![ServerEvent::LeaveRoomSuccess {
            room_id: rid("r1"),
            session_id: sid("b"),
        }]
    );
    assert_eq!(
        drain(&mut a),
        vec![ServerEvent::MemberLeft {
            room_id: rid("r1"),
            session_id: sid("b"),
            user_id: UserId::from("b"),
        }]
    );

    let again = c.dispatch(&sid("b"), ClientEvent::LeaveRoom { room_id: rid("r1") }).await;
    assert_eq!(
        again,
        vec![ServerEvent::LeaveRoomError {
            error: "not_in_room".into()
        }]
    );
}

#[tokio::test]
async fn test_public_rooms_lists_created_rooms() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;
    c.dispatch(&sid("a"), create("r1")).await;
    c.dispatch(&sid("a"), create("r2")).await;

    match &c.dispatch(&sid("a"), ClientEvent::GetPublicRooms {}).await[..] {
        [ServerEvent::GetPublicRoomsSuccess { data, count }] => {
            assert_eq!(*count, 2);
            assert!(data.iter().all(|r| r.current_size == 1));
        }
        other => panic!("expected get_public_rooms_success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_heartbeat_replies_ack() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;

    match &c.dispatch(&sid("a"), ClientEvent::Heartbeat {}).await[..] {
        [ServerEvent::HeartbeatAck { server_time }] => assert!(*server_time > 0),
        other => panic!("expected heartbeat_ack, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handle_event_queues_replies_on_sender_inbox() {
    let c = coordinator(CoordinatorConfig::default());
    let mut a = c.connect(sid("a")).await;

    c.handle_event(&sid("a"), create("r1")).await;
    let events = drain(&mut a);
    let names: Vec<_> = events.iter().map(ServerEvent::name).collect();
    assert_eq!(names, ["create_room_success", "room_joined"]);
}

// =========================================================================
// Rate limiting
// =========================================================================

#[tokio::test]
async fn test_dispatch_over_limit_is_refused_with_rate_limited() {
    let config = CoordinatorConfig {
        rate_limits: RateLimitConfig::unlimited().with_rule(
            "message",
            RateRule {
                max: 2,
                window: Duration::from_secs(60),
            },
        ),
        ..CoordinatorConfig::default()
    };
    let c = coordinator(config);
    let _a = c.connect(sid("a")).await;

    for _ in 0..2 {
        let reply = c.dispatch(&sid("a"), ClientEvent::Heartbeat {}).await;
        assert!(matches!(reply[..], [ServerEvent::HeartbeatAck { .. }]));
    }
    assert_eq!(
        c.dispatch(&sid("a"), ClientEvent::Heartbeat {}).await,
        vec![ServerEvent::Error {
            error: "rate_limited".into()
        }]
    );

    // Other buckets are unaffected.
    let reply = c.dispatch(&sid("a"), create("r1")).await;
    assert!(matches!(reply[0], ServerEvent::CreateRoomSuccess { .. }));
}

#[tokio::test]
async fn test_rate_limited_join_uses_join_error_shape() {
    let config = CoordinatorConfig {
        rate_limits: RateLimitConfig::unlimited()
            .with_rule("join_room", RateRule::per_minute(1)),
        ..CoordinatorConfig::default()
    };
    let c = coordinator(config);
    let _a = c.connect(sid("a")).await;

    c.dispatch(&sid("a"), join("r1")).await;
    assert_eq!(
        c.dispatch(&sid("a"), join("r2")).await,
        vec![ServerEvent::JoinRoomError {
            error: "rate_limited".into()
        }]
    );
}

// =========================================================================
// Authentication and disconnect
// =========================================================================

#[tokio::test]
async fn test_authenticate_attaches_identity() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;

    let reply = c
        .dispatch(&sid("a"), ClientEvent::Authenticate { token: "token-admin".into() })
        .await;
    match &reply[..] {
        [ServerEvent::Authenticated { session_id, user_id, roles }] => {
            assert_eq!(session_id, &sid("a"));
            assert_eq!(user_id, &UserId::from("admin"));
            assert!(roles.contains("admin"));
        }
        other => panic!("expected authenticated, got {other:?}"),
    }

    let presence = c.presence().get(&UserId::from("admin")).await.unwrap();
    assert_eq!(presence.status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_authenticate_bad_token_is_refused() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;

    let reply = c
        .dispatch(&sid("a"), ClientEvent::Authenticate { token: "garbage".into() })
        .await;
    assert_eq!(
        reply,
        vec![ServerEvent::AuthError {
            error: "invalid_token".into()
        }]
    );
    assert!(!c.sessions().get(&sid("a")).await.unwrap().authenticated);
}

#[tokio::test]
async fn test_authenticate_revoked_token_is_refused() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;
    assert!(c.revoke_token("token-mallory", Duration::from_secs(60)).await);

    let result = c.authenticate(&sid("a"), "token-mallory").await;
    assert!(matches!(result, Err(SessionError::TokenRevoked)));

    // A different token for the same user still works.
    assert!(c.authenticate(&sid("a"), "token-alice").await.is_ok());
}

#[tokio::test]
async fn test_disconnect_leaves_rooms_and_notifies_members() {
    let c = coordinator(CoordinatorConfig::default());
    let (mut a, _b) = two_member_room(&c, "r1").await;

    c.disconnect(&sid("b")).await;

    assert_eq!(
        drain(&mut a),
        vec![ServerEvent::MemberLeft {
            room_id: rid("r1"),
            session_id: sid("b"),
            user_id: UserId::from("b"),
        }]
    );
    assert!(c.sessions().get(&sid("b")).await.is_none());
    assert_eq!(c.rooms().get_room_info(&rid("r1")).await.unwrap().current_size, 1);
    assert_eq!(c.broadcast().connected().await, 1);
}

#[tokio::test]
async fn test_disconnect_last_session_marks_user_offline() {
    let c = coordinator(CoordinatorConfig::default());
    let _a = c.connect(sid("a")).await;
    let _b = c.connect(sid("b")).await;
    c.authenticate(&sid("a"), "token-alice").await.unwrap();
    c.authenticate(&sid("b"), "token-alice").await.unwrap();
    let alice = UserId::from("alice");

    c.disconnect(&sid("a")).await;
    assert_eq!(c.presence().get(&alice).await.unwrap().status, PresenceStatus::Online);

    c.disconnect(&sid("b")).await;
    assert_eq!(c.presence().get(&alice).await.unwrap().status, PresenceStatus::Offline);
}

// =========================================================================
// Eviction
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_sweep_ttl_expiry_notifies_each_member_once() {
    let c = coordinator(short_lived());
    let (mut a, mut b) = two_member_room(&c, "r1").await;

    tokio::time::advance(Duration::from_secs(61)).await;
    let report = c.sweep().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.stale, 0);

    assert_eq!(count_closed(&drain(&mut a), "ttl_expired"), 1);
    assert_eq!(count_closed(&drain(&mut b), "ttl_expired"), 1);
    assert!(c.rooms().get_room_info(&rid("r1")).await.is_none());
    assert!(c.sessions().get(&sid("a")).await.unwrap().rooms.is_empty());
    assert!(c.sessions().get(&sid("b")).await.unwrap().rooms.is_empty());

    // A second pass finds nothing.
    assert_eq!(c.sweep().await, SweepReport::default());
    assert!(drain(&mut a).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_closes_stale_empty_room() {
    let c = coordinator(short_lived());
    let mut a = c.connect(sid("a")).await;
    c.dispatch(&sid("a"), create("r1")).await;
    c.dispatch(&sid("a"), ClientEvent::LeaveRoom { room_id: rid("r1") }).await;
    drain(&mut a);

    tokio::time::advance(Duration::from_secs(31)).await;
    let report = c.sweep().await;
    assert_eq!(report.stale, 1);
    assert_eq!(report.expired, 0);
    assert!(c.rooms().get_room_info(&rid("r1")).await.is_none());
    assert!(drain(&mut a).is_empty(), "nobody left to notify");
}

#[tokio::test(start_paused = true)]
async fn test_join_before_sweep_keeps_room_alive() {
    let c = coordinator(short_lived());
    let (_a, _b) = two_member_room(&c, "r1").await;
    let _c3 = c.connect(sid("c")).await;

    tokio::time::advance(Duration::from_secs(45)).await;
    c.dispatch(&sid("c"), join("r1")).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(c.sweep().await.expired, 0);
    assert_eq!(c.rooms().get_room_info(&rid("r1")).await.unwrap().current_size, 3);
}

#[tokio::test]
async fn test_delete_room_requires_owner_and_notifies_members() {
    let c = coordinator(CoordinatorConfig::default());
    let (mut a, mut b) = two_member_room(&c, "r1").await;

    let refused = c.delete_room(&sid("b"), &rid("r1")).await;
    assert!(matches!(refused, Err(HuddleError::Room(RoomError::NotOwner { .. }))));

    let removed = c.delete_room(&sid("a"), &rid("r1")).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(count_closed(&drain(&mut a), "deleted"), 1);
    assert_eq!(count_closed(&drain(&mut b), "deleted"), 1);

    let gone = c.delete_room(&sid("a"), &rid("r1")).await;
    assert!(matches!(gone, Err(HuddleError::Room(RoomError::NotFound(_)))));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_drops_expired_revoked_tokens() {
    let c = coordinator(CoordinatorConfig::default());
    c.revoke_token("token-old", Duration::from_secs(10)).await;
    c.revoke_token("token-new", Duration::from_secs(600)).await;

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(c.sweep().await.tokens, 1);

    let _a = c.connect(sid("a")).await;
    assert!(c.authenticate(&sid("a"), "token-old").await.is_ok());
    assert!(matches!(
        c.authenticate(&sid("a"), "token-new").await,
        Err(SessionError::TokenRevoked)
    ));
}

// =========================================================================
// Hooks
// =========================================================================

#[tokio::test]
async fn test_hooks_fire_in_transition_order() {
    let recorder = Arc::new(Recorder::default());
    let cache = Arc::new(SecureCache::in_memory(&EncryptionKey::generate()).unwrap());
    let c = ConnectionCoordinator::new(StaticAuth, cache, CoordinatorConfig::default())
        .with_hook(Arc::clone(&recorder) as Arc<dyn RoomHooks>);

    let _a = c.connect(sid("a")).await;
    let _b = c.connect(sid("b")).await;
    c.dispatch(&sid("a"), create("r1")).await;
    c.dispatch(&sid("b"), join("r1")).await;
    c.dispatch(&sid("b"), ClientEvent::LeaveRoom { room_id: rid("r1") }).await;
    c.delete_room(&sid("a"), &rid("r1")).await.unwrap();

    assert_eq!(
        recorder.names(),
        ["room_created", "room_joined", "room_joined", "leave_room", "room_closed"]
    );
    assert_eq!(recorder.last("room_created")["owner_id"], "a");
    assert_eq!(recorder.last("room_joined")["current_size"], 2);
    assert_eq!(recorder.last("leave_room")["session_id"], "b");
    let closed = recorder.last("room_closed");
    assert_eq!(closed["reason"], "deleted");
    assert_eq!(closed["members"], serde_json::json!(["a"]));
}

#[tokio::test]
async fn test_create_existing_room_does_not_fire_room_created() {
    let recorder = Arc::new(Recorder::default());
    let cache = Arc::new(SecureCache::in_memory(&EncryptionKey::generate()).unwrap());
    let c = ConnectionCoordinator::new(StaticAuth, cache, CoordinatorConfig::default())
        .with_hook(Arc::clone(&recorder) as Arc<dyn RoomHooks>);

    let _a = c.connect(sid("a")).await;
    let _b = c.connect(sid("b")).await;
    c.dispatch(&sid("a"), create("r1")).await;
    let replies = c.dispatch(&sid("b"), create("r1")).await;
    match &replies[..] {
        [ServerEvent::CreateRoomSuccess { owner_id, .. }, ServerEvent::RoomJoined(_)] => {
            assert_eq!(owner_id, &UserId::from("a"));
        }
        other => panic!("unexpected replies {other:?}"),
    }

    let created = recorder.names().iter().filter(|n| **n == "room_created").count();
    assert_eq!(created, 1);
}

// =========================================================================
// Sweeper task
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_sweeper_closes_expired_rooms_and_stops_on_shutdown() {
    let c = coordinator(short_lived());
    let (mut a, _b) = two_member_room(&c, "r1").await;
    let (tx, rx) = watch::channel(false);

    let handle = spawn_sweeper(
        Arc::clone(&c),
        SweepConfig {
            interval: Duration::from_secs(10),
        },
        rx,
    );

    tokio::time::sleep(Duration::from_secs(75)).await;
    assert!(c.rooms().get_room_info(&rid("r1")).await.is_none());
    assert_eq!(count_closed(&drain(&mut a), "ttl_expired"), 1);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("sweeper should stop")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_when_sender_dropped() {
    let c = coordinator(CoordinatorConfig::default());
    let (tx, rx) = watch::channel(false);
    let handle = spawn_sweeper(c, SweepConfig::default(), rx);

    drop(tx);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("sweeper should stop")
        .unwrap();
}
