//! Authentication hook for resolving who a session belongs to.
//!
//! Huddle doesn't issue or check tokens itself. Your auth provider does
//! (a JWT service, an OAuth introspection endpoint, a static table in
//! tests). Huddle only needs the [`Authenticator`] contract: given a token
//! and the kind of token expected, return the claims or nothing.
//!
//! Until a session authenticates, its user id is the raw connection id.
//! A successful `authenticate` event replaces that provisional identity
//! with the verified one.

use std::collections::BTreeSet;
use std::fmt;

use huddle_protocol::UserId;

/// Which kind of token the caller expects. A refresh token presented
/// where an access token is expected must not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity a verified token carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: UserId,
    pub roles: BTreeSet<String>,
}

impl Claims {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
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

/// Verifies a client's token and returns its claims.
///
/// # Trait bounds
///
/// - `Send + Sync`: one authenticator is shared by every connection task.
/// - `'static`: it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use huddle_session::{Authenticator, Claims, TokenKind};
///
/// /// Accepts `user:<name>` and nothing else. Development only.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn verify(&self, token: &str, expected: TokenKind) -> Option<Claims> {
///         if expected != TokenKind::Access {
///             return None;
///         }
///         token.strip_prefix("user:").map(Claims::new)
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the claims in `token`, or `None` if it is invalid,
    /// expired, or not of the `expected` kind.
    fn verify(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> impl std::future::Future<Output = Option<Claims>> + Send;
}
