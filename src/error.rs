//! AX4 Archive - Error Types

use thiserror::Error;

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Archive error types
#[derive(Error, Debug)]
pub enum ArchiveError {
    // ═══════════════════════════════════════════════════════════════
    // PASSPHRASE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("A passphrase is required")]
    MissingPassphrase,

    #[error("Passphrase too short: at least {min} characters required")]
    WeakPassphrase { min: usize },

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    /// Wrong passphrase and damaged ciphertext share this variant.
    #[error("Incorrect passphrase or corrupted archive")]
    DecryptionAuthFailure,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid key material length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // ═══════════════════════════════════════════════════════════════
    // FORMAT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Unsupported archive format version: {0}")]
    UnsupportedFormatVersion(u32),

    #[error("Corrupt archive container: {0}")]
    CorruptContainer(String),

    #[error("Archive data failed validation: {0}")]
    SchemaValidationFailure(String),

    #[error("Archive too large: {size} bytes (max: {max})")]
    ArchiveTooLarge { size: u64, max: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ═══════════════════════════════════════════════════════════════
    // PHOTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    /// Reported in export results, never returned from an operation.
    #[error("Photo not found: {0}")]
    PhotoMissing(String),

    // ═══════════════════════════════════════════════════════════════
    // COLLABORATOR ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(anyhow::Error),

    #[error("Store does not support transactional restore")]
    RestoreNotTransactional,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ArchiveError {
    /// Errors that may indicate tampering or a guessing attempt
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            ArchiveError::DecryptionAuthFailure | ArchiveError::CorruptContainer(_)
        )
    }

    /// Errors the user can fix by changing their input and retrying
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            ArchiveError::MissingPassphrase
                | ArchiveError::WeakPassphrase { .. }
                | ArchiveError::DecryptionAuthFailure
        )
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(e: serde_json::Error) -> Self {
        ArchiveError::Serialization(e.to_string())
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        ArchiveError::CorruptContainer(e.to_string())
    }
}

impl From<rusqlite::Error> for ArchiveError {
    fn from(e: rusqlite::Error) -> Self {
        ArchiveError::Store(e.into())
    }
}
