//! AX4 Archive - Key Material
//!
//! Fixed sizes of the envelope's key material and its random generators.

use std::fmt;

use rand::RngCore;
use secrecy::{ExposeSecret, Secret};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Salt length for PBKDF2
pub const SALT_LEN: usize = 16;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Symmetric archive key, zeroized on drop
pub struct ArchiveKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl ArchiveKey {
    /// Wrap raw key bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl fmt::Debug for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArchiveKey([REDACTED])")
    }
}

/// Generate a fresh PBKDF2 salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generate a fresh AES-GCM nonce
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
