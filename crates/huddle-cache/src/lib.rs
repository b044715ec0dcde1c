//! # huddle-cache
//!
//! Encrypted, atomically-operable key-value cache for Huddle.
//!
//! Everything else in the workspace stores its shared state here. The
//! cache derives opaque storage keys from business identifiers, seals
//! values with AES-256-GCM, and offers the counter, set, and
//! compare-and-increment primitives the room registry needs to enforce
//! capacity under concurrent joins.
//!
//! ```no_run
//! use huddle_cache::{EncryptionKey, SecureCache};
//!
//! # async fn example() -> Result<(), huddle_cache::CacheError> {
//! let cache = SecureCache::in_memory(&EncryptionKey::generate())?;
//! let key = cache.key("room", &["lobby-1"]);
//! cache.set(&key, &"hello", None).await;
//! assert_eq!(cache.get::<String>(&key).await.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

mod backend;
mod cache;
mod config;
mod crypto;
mod error;
mod key;
mod tokens;

pub use backend::{CacheBackend, MemoryBackend, Watched};
#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use cache::SecureCache;
pub use config::CacheConfig;
pub use crypto::EncryptionKey;
pub use error::CacheError;
pub use key::{derive_key, prefix_pattern};
