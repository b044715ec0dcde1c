//! Storage backends behind [`SecureCache`](crate::SecureCache).
//!
//! A backend stores opaque bytes under opaque keys. It knows nothing about
//! encryption or key derivation; it only has to provide TTLs, integer
//! counters, string sets, cursor scanning, and an optimistic
//! watch/commit pair for compare-and-swap.
//!
//! - [`MemoryBackend`]: in-process, used for single-node deployments and
//!   tests. Expiry is measured on `tokio::time::Instant`.
//! - `RedisBackend` (feature `redis`): shared store for multi-node
//!   deployments.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use crate::CacheError;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// The result of [`CacheBackend::watch`]: the value seen at watch time plus
/// whatever the backend needs to detect a concurrent writer at commit time.
#[derive(Debug, Clone)]
pub struct Watched {
    /// The watched key.
    pub key: String,
    /// The value at watch time (`None` if the key was absent).
    pub value: Option<Vec<u8>>,
    /// Backend-specific change marker. The memory backend stores an entry
    /// version here; value-comparing backends leave it at 0.
    pub version: u64,
}

/// A key-value store the cache can sit on.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one backend instance is shared by every
/// connection task and the background sweeper. Every method returns a
/// `Send` future so callers can be spawned onto the multi-threaded runtime.
pub trait CacheBackend: Send + Sync + 'static {
    /// Returns the bytes stored at `key`, or `None` if absent or expired.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;

    /// Stores `value` at `key`, replacing any previous value. `ttl` of
    /// `None` stores without expiry.
    fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Deletes all `keys` in one atomic step. Returns how many existed.
    fn delete(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<usize, CacheError>> + Send;

    /// Returns `true` if `key` holds a live value of any type.
    fn exists(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Sets the expiry of an existing key. Returns `false` if absent.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Remaining time to live. `None` if absent or without expiry.
    fn ttl(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Duration>, CacheError>> + Send;

    /// Adds `delta` to the integer at `key` (absent counts as 0) and
    /// returns the new value. Existing expiry is preserved.
    fn incr_by(
        &self,
        key: &str,
        delta: i64,
    ) -> impl Future<Output = Result<i64, CacheError>> + Send;

    /// Adds `member` to the set at `key`. Returns `true` if newly added.
    fn set_add(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Removes `member` from the set at `key`. Returns `true` if present.
    fn set_remove(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Returns all members of the set at `key` (empty if absent).
    fn set_members(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<BTreeSet<String>, CacheError>> + Send;

    /// One step of a cursor scan over keys matching the glob `pattern`.
    ///
    /// Start with cursor 0; the scan is complete when the returned cursor
    /// is 0 again. A key may be reported more than once.
    fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> impl Future<Output = Result<(u64, Vec<String>), CacheError>> + Send;

    /// Reads `key` and remembers enough to detect a later concurrent write.
    fn watch(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Watched, CacheError>> + Send;

    /// Replaces the watched key's value with `value` only if nobody wrote
    /// the key since [`watch`](Self::watch). Returns `false` on conflict.
    /// The key's expiry is preserved.
    fn commit(
        &self,
        watched: &Watched,
        value: &[u8],
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;
}

/// Matches `key` against a Redis-style glob: `*` matches any run, `?` any
/// single character, `\` escapes the next character.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0usize, 0usize);
    // Position of the last '*' in the pattern and the key index it was
    // tried against, for backtracking.
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        match p.get(pi) {
            Some('*') => {
                star = Some((pi, ki));
                pi += 1;
                continue;
            }
            Some('?') => {
                pi += 1;
                ki += 1;
                continue;
            }
            Some('\\') if pi + 1 < p.len() && p[pi + 1] == k[ki] => {
                pi += 2;
                ki += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == k[ki] => {
                pi += 1;
                ki += 1;
                continue;
            }
            _ => {}
        }
        match star {
            Some((sp, sk)) => {
                pi = sp + 1;
                ki = sk + 1;
                star = Some((sp, sk + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
