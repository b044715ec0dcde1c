//! Error types for the transport layer.

/// Errors that can occur while accepting, reading from, or writing to a
/// connection.
///
/// Upgrade and frame errors from the WebSocket library are carried as
/// strings so this type does not depend on the optional `websocket`
/// feature.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not bind its address.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// The peer connected but the WebSocket upgrade failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The connection, or the listener behind `accept`, is closed.
    #[error("connection closed")]
    Closed,
}
