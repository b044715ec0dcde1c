//! Fan-out of server events to connected sessions.
//!
//! Every connected session has an outbox: the sending half of an
//! unbounded channel whose receiving half is drained by that connection's
//! writer task. Sending never touches a socket and never blocks, so any
//! task can broadcast, including the background sweeper.
//!
//! Delivery is best-effort. An event for a session whose writer has gone
//! away is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use huddle_cache::{CacheBackend, MemoryBackend};
use huddle_protocol::{RoomId, ServerEvent, SessionId};
use huddle_room::RoomRegistry;
use tokio::sync::{RwLock, mpsc};

/// Receiving half of a session's outbox.
pub type Inbox = mpsc::UnboundedReceiver<ServerEvent>;

pub struct BroadcastDispatcher<B: CacheBackend = MemoryBackend> {
    rooms: Arc<RoomRegistry<B>>,
    outboxes: RwLock<HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl<B: CacheBackend> BroadcastDispatcher<B> {
    pub fn new(rooms: Arc<RoomRegistry<B>>) -> Self {
        Self {
            rooms,
            outboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Opens an outbox for `session_id`, replacing any previous one.
    pub async fn register(&self, session_id: SessionId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.write().await.insert(session_id, tx);
        rx
    }

    /// Closes the session's outbox. Its writer task sees the channel end.
    pub async fn unregister(&self, session_id: &SessionId) {
        self.outboxes.write().await.remove(session_id);
    }

    /// Sends to one session. Returns `false` if it has no open outbox.
    pub async fn to_session(&self, session_id: &SessionId, event: ServerEvent) -> bool {
        match self.outboxes.read().await.get(session_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Sends to each listed session and returns how many accepted it.
    pub async fn to_sessions<'a, I>(&self, session_ids: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = &'a SessionId>,
    {
        let outboxes = self.outboxes.read().await;
        session_ids
            .into_iter()
            .filter_map(|id| outboxes.get(id))
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Sends to every member of `room_id` known to this process.
    pub async fn to_room(&self, room_id: &RoomId, event: ServerEvent) -> usize {
        let members = self.rooms.members(room_id).await;
        self.to_sessions(&members, &event).await
    }

    /// Sends to every member of `room_id` except `except`.
    pub async fn to_room_except(
        &self,
        room_id: &RoomId,
        except: &SessionId,
        event: ServerEvent,
    ) -> usize {
        let members = self.rooms.members(room_id).await;
        self.to_sessions(members.iter().filter(|id| *id != except), &event)
            .await
    }

    /// Sends to every connected session.
    pub async fn to_all(&self, event: ServerEvent) -> usize {
        let outboxes = self.outboxes.read().await;
        outboxes
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Number of open outboxes.
    pub async fn connected(&self) -> usize {
        self.outboxes.read().await.len()
    }
}
