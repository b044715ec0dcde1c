//! Deterministic storage-key derivation.
//!
//! Business identifiers (room ids, session ids, user ids, tokens) never
//! appear in the raw key space. Each key is the namespace prefix followed
//! by a SHA-256 digest over the prefix and the ordered argument tuple:
//!
//! ```text
//! derive_key("room", &["r1", "size"])  →  "room:6f1c…e2"
//! ```
//!
//! The prefix stays readable so whole namespaces can be matched with a
//! glob (`room:*`), which is what pattern deletion relies on.

use sha2::{Digest, Sha256};

/// Derives the storage key for `prefix` and `args`.
///
/// Identical inputs always produce identical keys. Every part is
/// length-prefixed before hashing, so `("a:b", "c")` and `("a", "b:c")`
/// cannot collide.
pub fn derive_key(prefix: &str, args: &[&str]) -> String {
    let mut hasher = Sha256::new();
    absorb(&mut hasher, prefix);
    for arg in args {
        absorb(&mut hasher, arg);
    }
    format!("{prefix}:{}", hex::encode(hasher.finalize()))
}

/// Returns the glob pattern matching every key derived under `prefix`.
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{prefix}:*")
}

fn absorb(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_be_bytes());
    hasher.update(part.as_bytes());
}
