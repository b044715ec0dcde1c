//! Per-connection handler: inbox writer, read loop, cleanup.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Register the session with the coordinator → get its inbox
//!   2. Spawn a writer task that drains the inbox into the socket
//!   3. Loop: receive frames → decode → `handle_event`
//!   4. On close, error, or idle timeout: disconnect the session
//!
//! Replies and broadcasts both go through the inbox, so frames reach the
//! client in the order the coordinator queued them.

use std::sync::Arc;
use std::time::Duration;

use huddle_cache::CacheBackend;
use huddle_protocol::{ClientEvent, Codec, JsonCodec, ServerEvent, SessionId};
use huddle_session::Authenticator;
use huddle_transport::{Connection, WebSocketConnection};

use crate::{ConnectionCoordinator, HuddleError};

/// Disconnects the session when the handler exits, even by panic.
///
/// `Drop` is synchronous, so the async disconnect runs on a spawned task.
struct DisconnectGuard<A: Authenticator, B: CacheBackend> {
    session_id: SessionId,
    coordinator: Arc<ConnectionCoordinator<A, B>>,
}

impl<A: Authenticator, B: CacheBackend> Drop for DisconnectGuard<A, B> {
    fn drop(&mut self) {
        let session_id = self.session_id.clone();
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            coordinator.disconnect(&session_id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, B>(
    conn: WebSocketConnection,
    coordinator: Arc<ConnectionCoordinator<A, B>>,
    idle_timeout: Duration,
) -> Result<(), HuddleError>
where
    A: Authenticator,
    B: CacheBackend,
{
    let conn = Arc::new(conn);
    let session_id = SessionId::new(conn.id().as_str());
    let codec = JsonCodec;
    tracing::debug!(%session_id, peer = %conn.peer_addr(), "handling new connection");

    let mut inbox = coordinator.connect(session_id.clone()).await;
    let _guard = DisconnectGuard {
        session_id: session_id.clone(),
        coordinator: Arc::clone(&coordinator),
    };

    let writer = {
        let conn = Arc::clone(&conn);
        let session_id = session_id.clone();
        tokio::spawn(async move {
            while let Some(event) = inbox.recv().await {
                let text = match codec.encode_text(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(%session_id, event = event.name(), error = %e, "failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&text).await {
                    tracing::debug!(%session_id, error = %e, "send failed, stopping writer");
                    break;
                }
            }
        })
    };

    let result = loop {
        let data = match tokio::time::timeout(idle_timeout, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%session_id, "connection closed cleanly");
                break Ok(());
            }
            Ok(Err(e)) => break Err(HuddleError::Transport(e)),
            Err(_) => {
                tracing::info!(%session_id, "connection idle, closing");
                break Ok(());
            }
        };

        let event: ClientEvent = match codec.decode(&data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(%session_id, error = %e, "failed to decode event");
                coordinator
                    .broadcast()
                    .to_session(
                        &session_id,
                        ServerEvent::Error {
                            error: "invalid_event".into(),
                        },
                    )
                    .await;
                continue;
            }
        };
        coordinator.handle_event(&session_id, event).await;
    };

    writer.abort();
    if let Err(e) = conn.close().await {
        tracing::trace!(%session_id, error = %e, "close after end of stream");
    }
    // _guard drops here → session disconnect fires.
    result
}
