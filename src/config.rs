//! AX4 Archive - Configuration
//!
//! Operational limits and policy. Cryptographic parameters are part of the
//! file format and are not configurable.

use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::CompressionMethod;

use crate::error::{ArchiveError, ArchiveResult};

/// Compression applied to container entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Deflated,
    Stored,
}

impl Compression {
    pub fn method(self) -> CompressionMethod {
        match self {
            Compression::Deflated => CompressionMethod::Deflated,
            Compression::Stored => CompressionMethod::Stored,
        }
    }
}

/// Archive service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Minimum passphrase length (in characters) accepted on export
    pub min_passphrase_len: usize,
    /// Compression for container entries
    pub compression: Compression,
    /// Largest archive file accepted or produced
    pub max_archive_bytes: u64,
    /// Largest single container entry accepted on import
    pub max_entry_bytes: u64,
    /// Refuse to restore into stores that cannot roll back
    pub require_transactional_restore: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            min_passphrase_len: 8,
            compression: Compression::Deflated,
            max_archive_bytes: 1024 * 1024 * 1024,
            max_entry_bytes: 256 * 1024 * 1024,
            require_transactional_restore: false,
        }
    }
}

impl ArchiveConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> ArchiveResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: ArchiveConfig =
            serde_json::from_str(&json).map_err(|e| ArchiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ArchiveResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject limits that would make every archive unusable
    pub fn validate(&self) -> ArchiveResult<()> {
        if self.min_passphrase_len == 0 {
            return Err(ArchiveError::Config("min_passphrase_len must be at least 1".into()));
        }
        if self.max_entry_bytes == 0 || self.max_archive_bytes == 0 {
            return Err(ArchiveError::Config("size limits must be non-zero".into()));
        }
        Ok(())
    }
}
