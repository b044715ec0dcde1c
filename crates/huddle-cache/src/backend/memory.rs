use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheBackend, Watched, glob_match};
use crate::CacheError;

/// In-process backend.
///
/// Keys live in an ordered map so scan cursors stay meaningful between
/// calls. Expired entries are dropped lazily on access. Every write bumps
/// a per-entry version, which is what [`commit`](CacheBackend::commit)
/// compares against.
///
/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    next_version: u64,
}

struct Entry {
    value: Value,
    version: u64,
    expires_at: Option<Instant>,
}

enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    /// Returns the live entry at `key`, evicting it first if it expired.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys. Intended for tests and diagnostics.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner.entries.values().filter(|e| e.is_live(now)).count()
    }

    /// Returns `true` if no live keys are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().await;
        let version = inner.bump();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                version,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = inner.entries.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Ok(inner
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut inner = self.inner.lock().await;
        let version = inner.bump();
        let current = match inner.live(key) {
            None => None,
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Some(parse_int(key, bytes)?),
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };

        let next = current
            .unwrap_or(0)
            .checked_add(delta)
            .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))?;
        let bytes = next.to_string().into_bytes();

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.value = Value::Bytes(bytes);
                entry.version = version;
            }
            None => {
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Bytes(bytes),
                        version,
                        expires_at: None,
                    },
                );
            }
        }
        Ok(next)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().await;
        let version = inner.bump();
        match inner.live(key) {
            Some(Entry {
                value: Value::Set(members),
                version: v,
                ..
            }) => {
                let added = members.insert(member.to_string());
                if added {
                    *v = version;
                }
                Ok(added)
            }
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => {
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(BTreeSet::from([member.to_string()])),
                        version,
                        expires_at: None,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().await;
        let version = inner.bump();
        let (removed, now_empty) = match inner.live(key) {
            Some(Entry {
                value: Value::Set(members),
                version: v,
                ..
            }) => {
                let removed = members.remove(member);
                if removed {
                    *v = version;
                }
                (removed, members.is_empty())
            }
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
            None => return Ok(false),
        };
        // An empty set is indistinguishable from an absent key.
        if now_empty {
            inner.entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, CacheError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => Ok(BTreeSet::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.clone()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), CacheError> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        let count = count.max(1);
        let start = cursor as usize;

        // The cursor is a position in key order. Keys inserted or removed
        // between calls may shift positions; callers tolerate duplicates.
        let window: Vec<(&String, &Entry)> =
            inner.entries.iter().skip(start).take(count).collect();
        let visited = window.len();
        let keys = window
            .into_iter()
            .filter(|(k, e)| e.is_live(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();

        let next = start + visited;
        let next_cursor = if visited < count || next >= inner.entries.len() {
            0
        } else {
            next as u64
        };
        Ok((next_cursor, keys))
    }

    async fn watch(&self, key: &str) -> Result<Watched, CacheError> {
        let mut inner = self.inner.lock().await;
        let (value, version) = match inner.live(key) {
            None => (None, 0),
            Some(Entry {
                value: Value::Bytes(bytes),
                version,
                ..
            }) => (Some(bytes.clone()), *version),
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        Ok(Watched {
            key: key.to_string(),
            value,
            version,
        })
    }

    async fn commit(&self, watched: &Watched, value: &[u8]) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().await;
        let version = inner.bump();
        match inner.live(&watched.key) {
            Some(entry) => {
                if watched.value.is_none() || entry.version != watched.version {
                    return Ok(false);
                }
                entry.value = Value::Bytes(value.to_vec());
                entry.version = version;
                Ok(true)
            }
            None => {
                if watched.value.is_some() {
                    return Ok(false);
                }
                inner.entries.insert(
                    watched.key.clone(),
                    Entry {
                        value: Value::Bytes(value.to_vec()),
                        version,
                        expires_at: None,
                    },
                );
                Ok(true)
            }
        }
    }
}

fn parse_int(key: &str, bytes: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let b = MemoryBackend::new();
        b.set("k", b"v", None).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(b.delete(&["k".to_string(), "missing".to_string()]).await.unwrap(), 1);
        assert_eq!(b.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_lazily() {
        let b = MemoryBackend::new();
        b.set("k", b"v", Some(Duration::from_secs(10))).await.unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(b.exists("k").await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!b.exists("k").await.unwrap());
        assert_eq!(b.ttl("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_by_keeps_expiry() {
        let b = MemoryBackend::new();
        b.set("n", b"1", Some(Duration::from_secs(30))).await.unwrap();
        assert_eq!(b.incr_by("n", 2).await.unwrap(), 3);
        assert_eq!(b.ttl("n").await.unwrap(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_incr_by_rejects_non_integer() {
        let b = MemoryBackend::new();
        b.set("n", b"abc", None).await.unwrap();
        assert!(matches!(
            b.incr_by("n", 1).await,
            Err(CacheError::NotAnInteger(_))
        ));
    }

    #[tokio::test]
    async fn test_set_ops_and_wrong_type() {
        let b = MemoryBackend::new();
        assert!(b.set_add("s", "a").await.unwrap());
        assert!(!b.set_add("s", "a").await.unwrap());
        assert!(b.set_add("s", "b").await.unwrap());
        assert_eq!(b.set_members("s").await.unwrap().len(), 2);
        assert!(matches!(b.get("s").await, Err(CacheError::WrongType(_))));
        assert!(b.set_remove("s", "a").await.unwrap());
        assert!(b.set_remove("s", "b").await.unwrap());
        assert!(!b.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_visits_every_matching_key() {
        let b = MemoryBackend::new();
        for i in 0..25 {
            b.set(&format!("room:{i:02}"), b"x", None).await.unwrap();
            b.set(&format!("session:{i:02}"), b"x", None).await.unwrap();
        }

        let mut cursor = 0;
        let mut seen = BTreeSet::new();
        loop {
            let (next, keys) = b.scan(cursor, "room:*", 7).await.unwrap();
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 25);
        assert!(seen.iter().all(|k| k.starts_with("room:")));
    }

    #[tokio::test]
    async fn test_commit_detects_concurrent_write() {
        let b = MemoryBackend::new();
        b.set("c", b"1", None).await.unwrap();

        let w = b.watch("c").await.unwrap();
        b.set("c", b"5", None).await.unwrap();
        assert!(!b.commit(&w, b"2").await.unwrap());

        let w = b.watch("c").await.unwrap();
        assert!(b.commit(&w, b"6").await.unwrap());
        assert_eq!(b.get("c").await.unwrap(), Some(b"6".to_vec()));
    }

    #[tokio::test]
    async fn test_commit_on_absent_key_conflicts_with_creator() {
        let b = MemoryBackend::new();
        let w = b.watch("c").await.unwrap();
        assert_eq!(w.value, None);
        b.set("c", b"1", None).await.unwrap();
        assert!(!b.commit(&w, b"1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_preserves_ttl() {
        let b = MemoryBackend::new();
        b.set("c", b"1", Some(Duration::from_secs(60))).await.unwrap();
        let w = b.watch("c").await.unwrap();
        assert!(b.commit(&w, b"2").await.unwrap());
        assert_eq!(b.ttl("c").await.unwrap(), Some(Duration::from_secs(60)));
    }
}
