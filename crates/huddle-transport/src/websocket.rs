//! WebSocket listener and connections over `tokio-tungstenite`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, ConnectionId, Transport, TransportError};

type WsStream = WebSocketStream<TcpStream>;

/// How long a peer gets to finish the upgrade after the TCP accept.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upgraded connections waiting for [`accept`](Transport::accept).
const BACKLOG: usize = 128;

/// TCP listener that upgrades every accepted socket to WebSocket.
///
/// A background task owns the listener and runs each upgrade in its own
/// task, so a peer that never completes its handshake holds up nobody
/// else. Sockets that fail or time out the upgrade are dropped there and
/// never reach [`accept`](Transport::accept).
pub struct WebSocketTransport {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<WebSocketConnection>,
    acceptor: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address. Use port 0
    /// to let the OS pick one, then read it back with
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        Self::bind_with(addr, HANDSHAKE_TIMEOUT).await
    }

    /// Like [`bind`](Self::bind) with a custom upgrade deadline.
    pub async fn bind_with(addr: &str, handshake_timeout: Duration) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
        let local_addr = listener.local_addr().map_err(TransportError::Bind)?;
        tracing::info!(addr, "listening for WebSocket clients");

        let (tx, incoming) = mpsc::channel(BACKLOG);
        let acceptor = tokio::spawn(accept_loop(listener, tx, handshake_timeout));
        Ok(Self {
            local_addr,
            incoming,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<WebSocketConnection>,
    handshake_timeout: Duration,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Usually out of file descriptors; back off instead of spinning.
                tracing::warn!(error = %e, "tcp accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            match upgrade(stream, peer, handshake_timeout).await {
                Ok(conn) => {
                    // The receiver is gone only when the transport was dropped.
                    let _ = tx.send(conn).await;
                }
                Err(e) => tracing::debug!(%peer, error = %e, "websocket upgrade failed"),
            }
        });
    }
}

async fn upgrade(
    stream: TcpStream,
    peer: SocketAddr,
    handshake_timeout: Duration,
) -> Result<WebSocketConnection, TransportError> {
    let ws = tokio::time::timeout(handshake_timeout, tokio_tungstenite::accept_async(stream))
        .await
        .map_err(|_| TransportError::Handshake(format!("timed out after {handshake_timeout:?}")))?
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    let id = ConnectionId::generate();
    tracing::debug!(%id, %peer, "accepted WebSocket connection");

    let (sink, stream) = ws.split();
    Ok(WebSocketConnection {
        id,
        peer,
        sink: Mutex::new(sink),
        stream: Mutex::new(stream),
    })
}

/// One upgraded client socket.
///
/// The write half and read half sit behind separate locks so one task can
/// wait in [`recv`](Connection::recv) while another sends.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn id(&self) -> &ConnectionId {
        &self.id
    }
}
