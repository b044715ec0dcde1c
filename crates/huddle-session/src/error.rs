//! Error types for the session layer.

use huddle_protocol::SessionId;

/// Errors that can occur during session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the given id. Either the connection was
    /// never registered or it has already disconnected.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The [`Authenticator`](crate::Authenticator) did not accept the
    /// token (malformed, expired, or of the wrong type).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The token is in the revoked-token registry.
    #[error("token has been revoked")]
    TokenRevoked,
}

impl SessionError {
    /// The `error` string sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "session_not_found",
            Self::AuthFailed(_) => "invalid_token",
            Self::TokenRevoked => "token_revoked",
        }
    }
}
