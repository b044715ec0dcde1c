//! # Huddle
//!
//! Real-time room and session coordination for multiplayer backends.
//!
//! Clients connect over WebSocket, authenticate, and create, join, or
//! leave rooms. Room and session state lives in an encrypted cache
//! ([`SecureCache`](huddle_cache::SecureCache)) that several server
//! processes can share; a background sweeper closes rooms whose TTL ran
//! out and empty rooms nobody came back to.
//!
//! ```text
//! WebSocket → handler → ConnectionCoordinator ─┬─ SessionStore / PresenceTracker
//!                                              ├─ RoomRegistry
//!                                              ├─ RateLimiter
//!                                              └─ BroadcastDispatcher → outboxes
//!                         sweeper ─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huddle::prelude::*;
//!
//! struct DevAuth;
//!
//! impl Authenticator for DevAuth {
//!     async fn verify(&self, token: &str, _: TokenKind) -> Option<Claims> {
//!         Some(Claims::new(token))
//!     }
//! }
//!
//! # async fn run() -> Result<(), HuddleError> {
//! huddle::init_tracing();
//! let cache = Arc::new(SecureCache::in_memory(&EncryptionKey::generate())?);
//! let server = HuddleServer::<DevAuth, MemoryBackend>::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(DevAuth, cache)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod broadcast;
mod coordinator;
mod error;
mod handler;
mod hooks;
mod server;
mod sweeper;

pub use broadcast::{BroadcastDispatcher, Inbox};
pub use coordinator::{ConnectionCoordinator, CoordinatorConfig, REVOKED_TOKENS, SweepReport};
pub use error::HuddleError;
pub use hooks::{HookData, RoomHooks};
pub use server::{HuddleServer, HuddleServerBuilder, ShutdownHandle};
pub use sweeper::{SweepConfig, spawn_sweeper};

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub mod prelude {
    pub use crate::{
        ConnectionCoordinator, CoordinatorConfig, HookData, HuddleError, HuddleServer,
        HuddleServerBuilder, RoomHooks, ShutdownHandle, SweepConfig,
    };
    pub use huddle_cache::{CacheConfig, EncryptionKey, MemoryBackend, SecureCache};
    pub use huddle_protocol::{
        ClientEvent, CreateRoomRequest, Permission, RoomId, ServerEvent, SessionId, UserId,
    };
    pub use huddle_room::{RoomConfig, RoomError};
    pub use huddle_session::{
        Authenticator, Claims, PresenceStatus, RateLimitConfig, RateRule, SessionConfig,
        SessionError, TokenKind,
    };
}
