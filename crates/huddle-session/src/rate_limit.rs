//! Windowed request counters per client and action type.
//!
//! Limiting is advisory. [`RateLimiter::check`] and
//! [`RateLimiter::record`] are separate calls, so two concurrent requests
//! can both pass a check at `max - 1`. The counters use the cache's plain
//! increment, not compare-and-increment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use huddle_cache::{CacheBackend, MemoryBackend, SecureCache};

/// At most `max` actions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub max: u64,
    pub window: Duration,
}

impl RateRule {
    pub fn per_minute(max: u64) -> Self {
        Self {
            max,
            window: Duration::from_secs(60),
        }
    }
}

/// Rules keyed by limit type. Types without a rule are unlimited.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub rules: HashMap<String, RateRule>,
}

impl RateLimitConfig {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, limit_type: impl Into<String>, rule: RateRule) -> Self {
        self.rules.insert(limit_type.into(), rule);
        self
    }

    pub fn rule(&self, limit_type: &str) -> Option<&RateRule> {
        self.rules.get(limit_type)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::unlimited()
            .with_rule("create_room", RateRule::per_minute(5))
            .with_rule("join_room", RateRule::per_minute(30))
            .with_rule("message", RateRule::per_minute(120))
    }
}

pub struct RateLimiter<B: CacheBackend = MemoryBackend> {
    cache: Arc<SecureCache<B>>,
    config: RateLimitConfig,
}

impl<B: CacheBackend> RateLimiter<B> {
    pub fn new(cache: Arc<SecureCache<B>>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn key(&self, client_id: &str, limit_type: &str) -> String {
        self.cache
            .key(&format!("rate_limit:{limit_type}"), &[client_id])
    }

    /// `false` once `client_id` has used up its `limit_type` budget for
    /// the current window.
    pub async fn check(&self, client_id: &str, limit_type: &str) -> bool {
        let Some(rule) = self.config.rule(limit_type) else {
            return true;
        };
        let used = self
            .cache
            .get_counter(&self.key(client_id, limit_type))
            .await
            .unwrap_or(0);
        u64::try_from(used).unwrap_or(0) < rule.max
    }

    /// Counts one action and restarts the window.
    pub async fn record(&self, client_id: &str, limit_type: &str) {
        let Some(rule) = self.config.rule(limit_type) else {
            return;
        };
        let key = self.key(client_id, limit_type);
        if self.cache.increment(&key).await.is_some() {
            self.cache.expire(&key, rule.window).await;
        }
    }

    /// [`check`](Self::check), then [`record`](Self::record) if allowed.
    pub async fn allow(&self, client_id: &str, limit_type: &str) -> bool {
        if !self.check(client_id, limit_type).await {
            tracing::debug!(client_id, limit_type, "rate limited");
            return false;
        }
        self.record(client_id, limit_type).await;
        true
    }
}
