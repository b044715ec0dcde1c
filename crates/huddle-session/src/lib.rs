//! Session management for Huddle.
//!
//! This crate handles everything that hangs off a single connection:
//!
//! 1. **Authentication**: resolving who a connection belongs to
//!    ([`Authenticator`] trait)
//! 2. **Session tracking**: identity, roles, and room memberships per
//!    connection ([`SessionStore`])
//! 3. **Presence**: derived online / last-seen records per user
//!    ([`PresenceTracker`])
//! 4. **Rate limiting**: advisory windowed counters per client and action
//!    ([`RateLimiter`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Coordinator (above)  ← drives sessions from inbound events
//!     ↕
//! Session Layer (this crate)  ← per-connection state, cascades leaves
//!     ↕
//! Room Layer (below)  ← room membership and capacity
//! ```

mod auth;
mod error;
mod presence;
mod rate_limit;
mod session;
mod store;

pub use auth::{Authenticator, Claims, TokenKind};
pub use error::SessionError;
pub use presence::PresenceTracker;
pub use rate_limit::{RateLimitConfig, RateLimiter, RateRule};
pub use session::{Presence, PresenceStatus, Session, SessionConfig};
pub use store::SessionStore;
