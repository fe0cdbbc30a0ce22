//! AX4 Archive - AEAD Encryption
//!
//! AES-256-GCM over the packed archive. Decryption failures of any kind are
//! reported as one opaque error.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};

use super::keys::{generate_nonce, ArchiveKey, NONCE_LEN, TAG_LEN};
use crate::error::{ArchiveError, ArchiveResult};

/// Ciphertext together with the nonce it was produced under
pub struct EncryptedData {
    /// 12-byte AES-GCM nonce
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with authentication tag appended
    pub ciphertext: Vec<u8>,
}

/// Encrypt with AES-256-GCM under a caller-supplied nonce
pub fn encrypt(
    key: &ArchiveKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> ArchiveResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| ArchiveError::EncryptionFailed(e.to_string()))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|e| ArchiveError::EncryptionFailed(e.to_string()))
}

/// Encrypt with a freshly generated nonce
pub fn encrypt_fresh(key: &ArchiveKey, plaintext: &[u8], aad: &[u8]) -> ArchiveResult<EncryptedData> {
    let nonce = generate_nonce();
    let ciphertext = encrypt(key, &nonce, plaintext, aad)?;
    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypt AES-256-GCM ciphertext
pub fn decrypt(key: &ArchiveKey, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> ArchiveResult<Vec<u8>> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(ArchiveError::DecryptionAuthFailure);
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.expose()).map_err(|_| ArchiveError::DecryptionAuthFailure)?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| ArchiveError::DecryptionAuthFailure)
}
