//! TTL-scoped token registry.
//!
//! Each issued token gets an expiring marker key, `token:<type>:<token>`,
//! and its marker key is recorded in a per-type index set, `tokens:<type>`.
//! The marker's own TTL is authoritative; the index set may keep stale
//! members until [`SecureCache::sweep_expired`] removes them.
//!
//! Tokens themselves are never stored, only their derived keys.

use std::time::Duration;

use crate::SecureCache;
use crate::backend::CacheBackend;

impl<B: CacheBackend> SecureCache<B> {
    fn token_key(&self, token_type: &str, token: &str) -> String {
        self.key("token", &[token_type, token])
    }

    fn token_index_key(&self, token_type: &str) -> String {
        self.key("tokens", &[token_type])
    }

    /// Registers `token` under `token_type` for `ttl`. Returns `false` if
    /// the marker could not be written.
    pub async fn store_token(&self, token_type: &str, token: &str, ttl: Duration) -> bool {
        let marker = self.token_key(token_type, token);
        if !self.set(&marker, &true, Some(ttl)).await {
            return false;
        }
        self.set_add(&self.token_index_key(token_type), &marker).await;
        tracing::debug!(token_type, ttl_secs = ttl.as_secs(), "token stored");
        true
    }

    /// `true` while the token's marker has not expired or been revoked.
    pub async fn is_token_valid(&self, token_type: &str, token: &str) -> bool {
        self.exists(&self.token_key(token_type, token)).await
    }

    /// Removes the token's marker and its index entry. Returns `true` if
    /// the token was live.
    pub async fn revoke_token(&self, token_type: &str, token: &str) -> bool {
        let marker = self.token_key(token_type, token);
        let removed = self.delete(&marker).await;
        self.set_remove(&self.token_index_key(token_type), &marker)
            .await;
        removed
    }

    /// Drops index entries whose marker has already expired and returns
    /// how many were dropped.
    pub async fn sweep_expired(&self, token_type: &str) -> usize {
        let index = self.token_index_key(token_type);
        let mut swept = 0;
        for marker in self.set_members(&index).await {
            // A failed existence check keeps the member for the next sweep.
            match self.try_exists(&marker).await {
                Ok(false) => {
                    if self.set_remove(&index, &marker).await {
                        swept += 1;
                    }
                }
                Ok(true) => {}
                Err(e) => {
                    tracing::warn!(token_type, error = %e, "token sweep existence check failed");
                }
            }
        }
        if swept > 0 {
            tracing::debug!(token_type, swept, "expired tokens swept");
        }
        swept
    }

    /// Number of entries currently in the index for `token_type`,
    /// including stale ones not yet swept.
    pub async fn indexed_token_count(&self, token_type: &str) -> usize {
        self.set_members(&self.token_index_key(token_type))
            .await
            .len()
    }
}
