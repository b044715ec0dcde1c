//! At-rest sealing of cache values with AES-256-GCM.
//!
//! Stored layout: `[nonce (12 bytes)][ciphertext + tag]`. A fresh random
//! nonce is drawn for every seal, so the same plaintext never produces the
//! same bytes twice.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;

use crate::CacheError;

/// Length of an AES-GCM nonce in bytes.
const NONCE_LEN: usize = 12;

/// A 256-bit symmetric key used to seal cache values.
///
/// `Debug` never prints the key material.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a 64-character hex string (the form operators put in
    /// secret stores).
    pub fn from_hex(encoded: &str) -> Result<Self, CacheError> {
        let raw = hex::decode(encoded.trim())
            .map_err(|e| CacheError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 32] = raw.try_into().map_err(|raw: Vec<u8>| {
            CacheError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes[..]);
        Self(bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Seals and opens byte payloads. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Sealer {
    cipher: Arc<Aes256Gcm>,
}

impl Sealer {
    pub(crate) fn new(key: &EncryptionKey) -> Result<Self, CacheError> {
        let cipher = Aes256Gcm::new_from_slice(&key.0)
            .map_err(|e| CacheError::InvalidKey(e.to_string()))?;
        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CacheError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CacheError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub(crate) fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CacheError> {
        if sealed.len() < NONCE_LEN {
            return Err(CacheError::Decrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CacheError::Decrypt)
    }
}
