/// Tunables for [`SecureCache`](crate::SecureCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prepended to every derived key as `{namespace}:` so several
    /// deployments can share one store.
    pub namespace: Option<String>,
    /// How many conflicting commits `check_and_increment_with_limit`
    /// tolerates before giving up with `CacheError::Contention`.
    pub cas_max_retries: u32,
    /// Keys requested per scan step and deleted per batch in
    /// `delete_by_pattern`.
    pub scan_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            cas_max_retries: 16,
            scan_batch: 100,
        }
    }
}
