//! # AX4 Archive
//!
//! Encrypted, portable `.ax4zip` export and import of asbestos surveys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ARCHIVE SERVICE                      │
//! │   export: Packing ─► Sealing ─► Written                  │
//! │   import: Opening ─► Unpacking ─► Validating ─► Persist  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │   PACKER    │  │  ENVELOPE   │  │    RESTORE      │  │
//! │  │ survey.json │  │ PBKDF2 +    │  │  validate, then │  │
//! │  │ + photos/   │  │ AES-256-GCM │  │  upsert in order│  │
//! │  └──────┬──────┘  └─────────────┘  └────────┬────────┘  │
//! │         │                                   │           │
//! │  ┌──────┴───────────────────────────────────┴────────┐  │
//! │  │        RecordStore / PhotoStore (injected)         │  │
//! │  │            MemoryStore · SqliteStore               │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Key derived per archive with PBKDF2-HMAC-SHA256 (100,000 iterations, random salt)
//! - Container encrypted with AES-256-GCM, fresh nonce per export
//! - Envelope header authenticated as associated data
//! - Wrong passphrase and tampering report the same error
//! - Keys and plaintext containers zeroized after use

pub mod api;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod model;
pub mod packer;
pub mod restore;
pub mod schema;
pub mod secure_fs;
pub mod store;

pub use api::{ArchiveService, ExportReport, ExportStage, ExportedArchive, ImportStage};
pub use config::ArchiveConfig;
pub use envelope::{EncryptedEnvelope, EnvelopeHeader, FORMAT_VERSION};
pub use error::{ArchiveError, ArchiveResult};
pub use model::{Item, PhotoBlob, Room, Survey, SurveyData};
pub use restore::RestoreReport;
pub use store::{MemoryStore, PhotoStore, RecordStore, SqliteStore};

/// AX4 Archive version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
