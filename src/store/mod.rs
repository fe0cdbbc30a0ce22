//! AX4 Archive - Record and Photo Store Capabilities
//!
//! The archive never touches application storage directly; it talks to these
//! two traits. Upserts must be idempotent by identifier.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::model::{Item, PhotoBlob, Room, Survey};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Destination for survey records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert_survey(&self, survey: &Survey) -> anyhow::Result<()>;

    async fn upsert_room(&self, room: &Room) -> anyhow::Result<()>;

    async fn upsert_item(&self, item: &Item) -> anyhow::Result<()>;

    /// Start an all-or-nothing restore. Returns `false` when the store cannot
    /// roll back, in which case commit/rollback are never called. The
    /// transaction covers photos only when the same object is the photo store.
    /// `rollback_restore` may follow a failed `commit_restore`.
    async fn begin_restore(&self) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn commit_restore(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback_restore(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Source and destination for photo content
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Look up a photo by ID; `Ok(None)` means not found
    async fn resolve_photo(&self, photo_id: &str) -> anyhow::Result<Option<PhotoBlob>>;

    /// Store photo bytes under the ID encoded in `filename`, returning that ID
    async fn upsert_photo(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<String>;
}

/// Photo ID encoded in an archive filename: everything before the last `.`
pub fn photo_id_from_filename(filename: &str) -> &str {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
