use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::{CacheBackend, MemoryBackend};
use crate::crypto::{EncryptionKey, Sealer};
use crate::{CacheConfig, CacheError, derive_key, prefix_pattern};

/// Encrypted key-value cache over a [`CacheBackend`].
///
/// # Storage layout
///
/// - Keys are produced by [`key`](Self::key): a readable prefix plus a
///   SHA-256 digest of the arguments. Business identifiers never appear in
///   the key space.
/// - Values written through [`set`](Self::set) are JSON-encoded, then
///   sealed with AES-256-GCM. Set-valued fields are typed
///   (`BTreeSet`) in the stored structs, so they round-trip as sets.
/// - Counters are stored as plain decimal integers because the backend
///   must be able to increment them in place.
///
/// # Failure semantics
///
/// The plain methods fail soft: a backend or crypto fault is logged and
/// collapsed into `None`/`false`/`0`. A value that cannot be opened (for
/// example after a key rotation) reads as a miss. `try_*` variants return
/// the underlying [`CacheError`] instead. The one operation that never
/// fails soft is [`check_and_increment_with_limit`](Self::check_and_increment_with_limit).
pub struct SecureCache<B: CacheBackend = MemoryBackend> {
    backend: B,
    sealer: Sealer,
    config: CacheConfig,
}

impl SecureCache<MemoryBackend> {
    /// A cache over a fresh [`MemoryBackend`] with default configuration.
    pub fn in_memory(key: &EncryptionKey) -> Result<Self, CacheError> {
        Self::new(MemoryBackend::new(), key, CacheConfig::default())
    }
}

impl<B: CacheBackend> SecureCache<B> {
    /// Wraps `backend`, sealing values with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] if the cipher cannot be built.
    pub fn new(backend: B, key: &EncryptionKey, config: CacheConfig) -> Result<Self, CacheError> {
        Ok(Self {
            backend,
            sealer: Sealer::new(key)?,
            config,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Derives the storage key for `prefix` and `args`, inside this
    /// cache's namespace.
    pub fn key(&self, prefix: &str, args: &[&str]) -> String {
        self.namespaced(derive_key(prefix, args))
    }

    /// Glob matching every key derived under `prefix` in this namespace.
    pub fn pattern(&self, prefix: &str) -> String {
        self.namespaced(prefix_pattern(prefix))
    }

    fn namespaced(&self, raw: String) -> String {
        match &self.config.namespace {
            Some(ns) => format!("{ns}:{raw}"),
            None => raw,
        }
    }

    // ---- Values ----

    /// Reads and opens the value at `key`.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(sealed) = self.backend.get(key).await? else {
            return Ok(None);
        };
        let plain = self.sealer.open(&sealed)?;
        serde_json::from_slice(&plain)
            .map(Some)
            .map_err(CacheError::Decode)
    }

    /// Reads the value at `key`. Missing, undecryptable, and undecodable
    /// values all read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e @ (CacheError::Decrypt | CacheError::Decode(_))) => {
                tracing::debug!(key, error = %e, "unreadable cache value treated as miss");
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache get failed");
                None
            }
        }
    }

    /// Seals and stores `value` at `key`.
    pub async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let plain = serde_json::to_vec(value).map_err(CacheError::Encode)?;
        let sealed = self.sealer.seal(&plain)?;
        self.backend.set(key, &sealed, ttl).await
    }

    /// Stores `value` at `key`. Returns `false` if the write failed.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match self.try_set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache set failed");
                false
            }
        }
    }

    /// Deletes `key`. Returns `true` if it existed.
    pub async fn delete(&self, key: &str) -> bool {
        self.delete_many(&[key.to_string()]).await > 0
    }

    /// Deletes all `keys` in one atomic step. Returns how many existed.
    pub async fn delete_many(&self, keys: &[String]) -> usize {
        match self.backend.delete(keys).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, count = keys.len(), "cache delete failed");
                0
            }
        }
    }

    pub async fn try_exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.try_exists(key).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache exists failed");
            false
        })
    }

    /// Resets the expiry of `key`. Returns `false` if absent or on failure.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.backend.expire(key, ttl).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache expire failed");
            false
        })
    }

    /// Remaining time to live of `key`. `Ok(None)` if the key is absent
    /// or never expires.
    pub async fn try_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.backend.ttl(key).await
    }

    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        self.try_ttl(key).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache ttl failed");
            None
        })
    }

    // ---- Counters ----

    /// Adds `delta` to the counter at `key`, creating it if absent.
    ///
    /// This is a best-effort counter: the existence check and the write
    /// are separate steps, so two callers creating the same counter at the
    /// same time can lose an update. Use
    /// [`check_and_increment_with_limit`](Self::check_and_increment_with_limit)
    /// where a bound must hold.
    pub async fn increment_by(&self, key: &str, delta: i64) -> Option<i64> {
        match self.try_increment_by(key, delta).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(key, delta, error = %e, "cache increment failed");
                None
            }
        }
    }

    pub async fn try_increment_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        if self.backend.exists(key).await? {
            self.backend.incr_by(key, delta).await
        } else {
            self.backend
                .set(key, delta.to_string().as_bytes(), None)
                .await?;
            Ok(delta)
        }
    }

    pub async fn increment(&self, key: &str) -> Option<i64> {
        self.increment_by(key, 1).await
    }

    pub async fn decrement(&self, key: &str) -> Option<i64> {
        self.increment_by(key, -1).await
    }

    /// Reads the counter at `key`.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotAnInteger`] if the key holds something else, or
    /// the backend error.
    pub async fn try_get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        match self.backend.get(key).await? {
            Some(raw) => parse_counter(&raw)
                .map(Some)
                .ok_or_else(|| CacheError::NotAnInteger(key.to_string())),
            None => Ok(None),
        }
    }

    /// Reads the counter at `key`. Absent or non-numeric reads as `None`.
    pub async fn get_counter(&self, key: &str) -> Option<i64> {
        self.try_get_counter(key).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache counter read failed");
            None
        })
    }

    /// Overwrites the counter at `key`.
    pub async fn set_counter(&self, key: &str, value: i64, ttl: Option<Duration>) -> bool {
        match self.backend.set(key, value.to_string().as_bytes(), ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache counter write failed");
                false
            }
        }
    }

    /// Atomically increments the counter at `key` if it is below `limit`.
    ///
    /// Runs an optimistic loop: watch the key, read the current value,
    /// stop with `Ok(false)` if it is already at or above `limit`,
    /// otherwise commit `current + 1`. A conflicting concurrent writer
    /// restarts the whole cycle. `Ok(true)` means the increment was
    /// committed while under the limit.
    ///
    /// # Errors
    ///
    /// [`CacheError::Contention`] after `cas_max_retries` conflicts, or the
    /// backend error that interrupted the loop. Callers must treat any
    /// error as "not incremented".
    pub async fn check_and_increment_with_limit(
        &self,
        key: &str,
        limit: i64,
    ) -> Result<bool, CacheError> {
        let max_attempts = self.config.cas_max_retries.max(1);
        for attempt in 1..=max_attempts {
            let watched = self.backend.watch(key).await?;
            let current = match &watched.value {
                Some(raw) => {
                    parse_counter(raw).ok_or_else(|| CacheError::NotAnInteger(key.to_string()))?
                }
                None => 0,
            };
            if current >= limit {
                return Ok(false);
            }

            let next = (current + 1).to_string();
            if self.backend.commit(&watched, next.as_bytes()).await? {
                return Ok(true);
            }

            tracing::trace!(key, attempt, "compare-and-increment conflict, retrying");
            backoff(attempt).await;
        }

        tracing::warn!(key, attempts = max_attempts, "compare-and-increment gave up");
        Err(CacheError::Contention {
            key: key.to_string(),
            attempts: max_attempts,
        })
    }

    // ---- Sets ----

    pub async fn set_add(&self, key: &str, member: &str) -> bool {
        self.backend.set_add(key, member).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache set_add failed");
            false
        })
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> bool {
        self.backend.set_remove(key, member).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache set_remove failed");
            false
        })
    }

    pub async fn set_members(&self, key: &str) -> BTreeSet<String> {
        self.backend.set_members(key).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache set_members failed");
            BTreeSet::new()
        })
    }

    // ---- Bulk ----

    /// Deletes every key matching the glob `pattern` and returns how many
    /// were removed.
    ///
    /// Keys are collected with a cursor scan first and deleted afterwards
    /// in atomic batches of `scan_batch`, so deletions never disturb the
    /// scan cursor.
    pub async fn delete_by_pattern(&self, pattern: &str) -> usize {
        let batch = self.config.scan_batch.max(1);

        let mut found = HashSet::new();
        let mut cursor = 0;
        loop {
            match self.backend.scan(cursor, pattern, batch).await {
                Ok((next, keys)) => {
                    found.extend(keys);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "cache scan failed");
                    break;
                }
            }
        }

        let keys: Vec<String> = found.into_iter().collect();
        let mut removed = 0;
        for chunk in keys.chunks(batch) {
            removed += self.delete_many(chunk).await;
        }
        tracing::debug!(pattern, removed, "deleted keys by pattern");
        removed
    }
}

fn parse_counter(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

async fn backoff(attempt: u32) {
    if attempt < 3 {
        tokio::task::yield_now().await;
    } else {
        let ceiling = 50 * u64::from(attempt.min(20));
        let jitter = rand::random_range(0..ceiling);
        tokio::time::sleep(Duration::from_micros(jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SecureCache {
        SecureCache::in_memory(&EncryptionKey::generate()).unwrap()
    }

    #[tokio::test]
    async fn test_key_applies_namespace() {
        let key = EncryptionKey::generate();
        let config = CacheConfig {
            namespace: Some("eu1".into()),
            ..CacheConfig::default()
        };
        let cache = SecureCache::new(MemoryBackend::new(), &key, config).unwrap();
        assert!(cache.key("room", &["r1"]).starts_with("eu1:room:"));
        assert_eq!(cache.pattern("room"), "eu1:room:*");
    }

    #[tokio::test]
    async fn test_stored_bytes_are_not_plaintext() {
        let cache = cache();
        let key = cache.key("session", &["s1"]);
        assert!(cache.set(&key, "alice-password", None).await);

        let raw = cache.backend().get(&key).await.unwrap().unwrap();
        let needle = b"alice-password";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
        assert_eq!(
            cache.get::<String>(&key).await.as_deref(),
            Some("alice-password")
        );
    }

    #[tokio::test]
    async fn test_get_wrong_type_is_miss() {
        let cache = cache();
        let key = cache.key("room", &["r1"]);
        cache.set(&key, &42u32, None).await;
        assert_eq!(cache.get::<Vec<String>>(&key).await, None);
    }

    #[tokio::test]
    async fn test_increment_creates_then_adds() {
        let cache = cache();
        let key = cache.key("counter", &["c"]);
        assert_eq!(cache.increment(&key).await, Some(1));
        assert_eq!(cache.increment(&key).await, Some(2));
        assert_eq!(cache.decrement(&key).await, Some(1));
        assert_eq!(cache.get_counter(&key).await, Some(1));
    }

    #[tokio::test]
    async fn test_check_and_increment_stops_at_limit() {
        let cache = cache();
        let key = cache.key("room", &["r", "size"]);
        assert!(cache.check_and_increment_with_limit(&key, 2).await.unwrap());
        assert!(cache.check_and_increment_with_limit(&key, 2).await.unwrap());
        assert!(!cache.check_and_increment_with_limit(&key, 2).await.unwrap());
        assert_eq!(cache.get_counter(&key).await, Some(2));
    }

    #[tokio::test]
    async fn test_try_get_counter_distinguishes_missing_and_garbage() {
        let cache = cache();
        let key = cache.key("room", &["r", "size"]);
        assert_eq!(cache.try_get_counter(&key).await.unwrap(), None);

        cache.backend().set(&key, b"many", None).await.unwrap();
        assert!(matches!(
            cache.try_get_counter(&key).await,
            Err(CacheError::NotAnInteger(k)) if k == key
        ));
        // The fail-soft read reports a miss.
        assert_eq!(cache.get_counter(&key).await, None);
    }

    #[tokio::test]
    async fn test_check_and_increment_rejects_non_integer() {
        let cache = cache();
        let key = cache.key("room", &["r", "size"]);
        cache.backend().set(&key, b"many", None).await.unwrap();
        assert!(matches!(
            cache.check_and_increment_with_limit(&key, 10).await,
            Err(CacheError::NotAnInteger(_))
        ));
    }
}
