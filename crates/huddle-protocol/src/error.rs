//! Error types for the protocol layer.
//!
//! When you see a `ProtocolError`, the problem is in turning events into
//! bytes or back, not in networking or room management.

/// Errors that can occur while encoding or decoding wire events.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning an event into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, an unknown `event` tag,
    /// a missing `data` object, or fields of the wrong type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame is unusable before decoding even starts (for example a
    /// text frame that is not valid UTF-8).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
