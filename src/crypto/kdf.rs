//! AX4 Archive - Passphrase Key Derivation
//!
//! PBKDF2-HMAC-SHA256 with a fixed iteration count. The parameters are part of
//! the archive format: changing them breaks every archive already written.

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::{ArchiveKey, KEY_LEN, SALT_LEN};
use crate::error::{ArchiveError, ArchiveResult};

/// Name of the only supported KDF
pub const KDF_ALGORITHM: &str = "PBKDF2-SHA256";

/// PBKDF2 rounds
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derivation inputs recorded in the envelope (never the key itself)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Reject anything but the fixed format parameters
    pub fn ensure_supported(&self) -> ArchiveResult<()> {
        if self.algorithm != KDF_ALGORITHM || self.iterations != PBKDF2_ITERATIONS {
            return Err(ArchiveError::KeyDerivationFailed(format!(
                "unsupported KDF {} with {} iterations",
                self.algorithm, self.iterations
            )));
        }
        Ok(())
    }
}

/// Derive the archive key from a passphrase and salt
pub fn derive_key(passphrase: &SecretString, salt: &[u8]) -> ArchiveResult<ArchiveKey> {
    derive_key_bytes(passphrase.expose_secret().as_bytes(), salt)
}

/// Same as [`derive_key`], run on the blocking thread pool
pub async fn derive_key_async(passphrase: &SecretString, salt: [u8; SALT_LEN]) -> ArchiveResult<ArchiveKey> {
    let owned = Zeroizing::new(passphrase.expose_secret().clone());
    tokio::task::spawn_blocking(move || derive_key_bytes(owned.as_bytes(), &salt))
        .await
        .map_err(|e| ArchiveError::KeyDerivationFailed(e.to_string()))?
}

fn derive_key_bytes(passphrase: &[u8], salt: &[u8]) -> ArchiveResult<ArchiveKey> {
    if passphrase.is_empty() {
        return Err(ArchiveError::MissingPassphrase);
    }
    if salt.len() != SALT_LEN {
        return Err(ArchiveError::InvalidKeyLength {
            expected: SALT_LEN,
            actual: salt.len(),
        });
    }

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(passphrase, salt, PBKDF2_ITERATIONS, &mut okm[..]);

    Ok(ArchiveKey::new(*okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_derive_key_deterministic() {
        let salt = [1u8; SALT_LEN];
        let k1 = derive_key(&secret("Secret123!"), &salt).unwrap();
        let k2 = derive_key(&secret("Secret123!"), &salt).unwrap();
        assert_eq!(k1.expose(), k2.expose());
    }

    #[test]
    fn test_salt_and_passphrase_change_key() {
        let base = derive_key(&secret("Secret123!"), &[1u8; SALT_LEN]).unwrap();
        let other_salt = derive_key(&secret("Secret123!"), &[2u8; SALT_LEN]).unwrap();
        let other_pass = derive_key(&secret("Secret123?"), &[1u8; SALT_LEN]).unwrap();
        assert_ne!(base.expose(), other_salt.expose());
        assert_ne!(base.expose(), other_pass.expose());
    }

    #[test]
    fn test_reference_vector() {
        // Same output as WebCrypto deriveKey with PBKDF2/SHA-256/100000
        let key = derive_key(&secret("Secret123!"), b"ax4-salt-16bytes").unwrap();
        assert_eq!(
            hex::encode(key.expose()),
            "c18276adcd50a9a39f040d555599b63cdcc9a2e2751bb6b110cbf83d0972cb78"
        );
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let result = derive_key(&secret(""), &[0u8; SALT_LEN]);
        assert!(matches!(result, Err(ArchiveError::MissingPassphrase)));
    }

    #[test]
    fn test_bad_salt_length_rejected() {
        let result = derive_key(&secret("Secret123!"), &[0u8; 8]);
        assert!(matches!(
            result,
            Err(ArchiveError::InvalidKeyLength { expected: SALT_LEN, actual: 8 })
        ));
    }

    #[test]
    fn test_params_supported() {
        assert!(KdfParams::default().ensure_supported().is_ok());
        let weaker = KdfParams { iterations: 1_000, ..KdfParams::default() };
        assert!(weaker.ensure_supported().is_err());
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let salt = [9u8; SALT_LEN];
        let a = derive_key_async(&secret("Secret123!"), salt).await.unwrap();
        let b = derive_key(&secret("Secret123!"), &salt).unwrap();
        assert_eq!(a.expose(), b.expose());
    }
}
