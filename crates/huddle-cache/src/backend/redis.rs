use std::collections::BTreeSet;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::{CacheBackend, Watched};
use crate::CacheError;

/// Replaces the value at `KEYS[1]` only if it still equals the watched
/// value. `ARGV[1]` is `1` when the key existed at watch time, `ARGV[2]`
/// the watched value, `ARGV[3]` the new value.
const COMPARE_AND_SET: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if ARGV[1] == '0' then
        if current then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[3])
        return 1
    end
    if current ~= ARGV[2] then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[3], 'KEEPTTL')
    return 1
"#;

/// Backend over a shared Redis server.
///
/// Uses a [`ConnectionManager`], which reconnects transparently and is
/// cheap to clone per command.
#[derive(Clone)]
pub struct RedisBackend {
    conn_manager: ConnectionManager,
}

impl RedisBackend {
    /// Connects to `redis_url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        tracing::info!("connected to redis cache backend");
        Ok(Self { conn_manager })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        match ttl {
            Some(ttl) => conn.pset_ex::<_, _, ()>(key, value, millis(ttl)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn_manager.clone();
        // A single multi-key DEL is atomic on the server.
        Ok(conn.del(keys).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        let ms = i64::try_from(millis(ttl)).unwrap_or(i64::MAX);
        Ok(conn.pexpire(key, ms).await?)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let ms: i64 = conn.pttl(key).await?;
        // -2: absent, -1: no expiry.
        Ok(u64::try_from(ms).ok().map(Duration::from_millis))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.incr(key, delta).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        let added: usize = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        let removed: usize = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, CacheError> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), CacheError> {
        let mut conn = self.conn_manager.clone();
        let page: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(page)
    }

    async fn watch(&self, key: &str) -> Result<Watched, CacheError> {
        let value = self.get(key).await?;
        Ok(Watched {
            key: key.to_string(),
            value,
            version: 0,
        })
    }

    async fn commit(&self, watched: &Watched, value: &[u8]) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        let (existed, expected): (&str, &[u8]) = match &watched.value {
            Some(v) => ("1", v.as_slice()),
            None => ("0", b""),
        };
        let swapped: i64 = redis::Script::new(COMPARE_AND_SET)
            .key(&watched.key)
            .arg(existed)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}
