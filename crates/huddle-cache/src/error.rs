//! Error types for the cache layer.
//!
//! Backends report every fault through [`CacheError`]. The
//! [`SecureCache`](crate::SecureCache) façade decides which of these are
//! collapsed into a miss and which are surfaced to the caller.

/// Errors that can occur while talking to a cache backend or while
/// sealing/opening a stored value.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A Redis command failed: connection lost, store unreachable, or
    /// command rejected.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Sealing a value failed.
    #[error("encryption failed")]
    Encrypt,

    /// Opening a stored value failed: wrong key, tampered bytes, or a
    /// value written under a rotated key.
    #[error("decryption failed")]
    Decrypt,

    /// The value could not be serialized before sealing.
    #[error("value encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The decrypted bytes did not match the requested type.
    #[error("value decoding failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// A counter operation found a non-integer value at the key.
    #[error("value at {0} is not an integer")]
    NotAnInteger(String),

    /// A set operation hit a plain value, or vice versa.
    #[error("wrong value type at {0}")]
    WrongType(String),

    /// Compare-and-increment kept losing to concurrent writers.
    #[error("compare-and-increment on {key} gave up after {attempts} conflicting attempts")]
    Contention { key: String, attempts: u32 },

    /// The encryption key supplied at construction time is unusable.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
}
