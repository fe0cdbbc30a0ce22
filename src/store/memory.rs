//! AX4 Archive - In-Memory Store
//!
//! Both store traits over plain maps. Restores are transactional through a
//! snapshot taken at `begin_restore`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{photo_id_from_filename, PhotoStore, RecordStore};
use crate::model::{Item, PhotoBlob, Room, Survey};

#[derive(Debug, Clone, Default)]
struct State {
    surveys: HashMap<String, Survey>,
    rooms: HashMap<String, Room>,
    items: HashMap<String, Item>,
    photos: HashMap<String, PhotoBlob>,
}

/// In-memory record and photo store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    snapshot: Mutex<Option<State>>,
    transactional: bool,
}

impl MemoryStore {
    /// Create an empty transactional store
    pub fn new() -> Self {
        Self {
            transactional: true,
            ..Default::default()
        }
    }

    /// Create an empty store that reports no rollback support
    pub fn without_transactions() -> Self {
        Self::default()
    }

    /// Seed a photo directly
    pub fn insert_photo(&self, photo: PhotoBlob) {
        self.state.write().photos.insert(photo.photo_id.clone(), photo);
    }

    pub fn survey(&self, survey_id: &str) -> Option<Survey> {
        self.state.read().surveys.get(survey_id).cloned()
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.state.read().rooms.get(room_id).cloned()
    }

    pub fn item(&self, item_id: &str) -> Option<Item> {
        self.state.read().items.get(item_id).cloned()
    }

    pub fn photo(&self, photo_id: &str) -> Option<PhotoBlob> {
        self.state.read().photos.get(photo_id).cloned()
    }

    pub fn survey_count(&self) -> usize {
        self.state.read().surveys.len()
    }

    pub fn room_count(&self) -> usize {
        self.state.read().rooms.len()
    }

    pub fn item_count(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn photo_count(&self) -> usize {
        self.state.read().photos.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_survey(&self, survey: &Survey) -> anyhow::Result<()> {
        self.state.write().surveys.insert(survey.survey_id.clone(), survey.clone());
        Ok(())
    }

    async fn upsert_room(&self, room: &Room) -> anyhow::Result<()> {
        self.state.write().rooms.insert(room.room_id.clone(), room.clone());
        Ok(())
    }

    async fn upsert_item(&self, item: &Item) -> anyhow::Result<()> {
        self.state.write().items.insert(item.item_id.clone(), item.clone());
        Ok(())
    }

    async fn begin_restore(&self) -> anyhow::Result<bool> {
        if !self.transactional {
            return Ok(false);
        }
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_some() {
            anyhow::bail!("a restore is already in progress");
        }
        *snapshot = Some(self.state.read().clone());
        Ok(true)
    }

    async fn commit_restore(&self) -> anyhow::Result<()> {
        self.snapshot.lock().take();
        Ok(())
    }

    async fn rollback_restore(&self) -> anyhow::Result<()> {
        match self.snapshot.lock().take() {
            Some(previous) => {
                *self.state.write() = previous;
                Ok(())
            }
            None => anyhow::bail!("no restore in progress"),
        }
    }
}

#[async_trait]
impl PhotoStore for MemoryStore {
    async fn resolve_photo(&self, photo_id: &str) -> anyhow::Result<Option<PhotoBlob>> {
        Ok(self.photo(photo_id))
    }

    async fn upsert_photo(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let mut photo_id = photo_id_from_filename(filename).to_string();
        if photo_id.is_empty() {
            photo_id = Uuid::new_v4().to_string();
        }

        let mut state = self.state.write();
        let captured_at = state
            .photos
            .get(&photo_id)
            .and_then(|p| p.captured_at)
            .or_else(|| Some(Utc::now()));

        state.photos.insert(
            photo_id.clone(),
            PhotoBlob {
                photo_id: photo_id.clone(),
                filename: filename.to_string(),
                bytes: bytes.to_vec(),
                captured_at,
            },
        );
        Ok(photo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let s = survey("s1");
        store.upsert_survey(&s).await.unwrap();
        store.upsert_survey(&s).await.unwrap();
        store.upsert_room(&room("s1", "r1")).await.unwrap();
        store.upsert_room(&room("s1", "r1")).await.unwrap();

        assert_eq!(store.survey_count(), 1);
        assert_eq!(store.room_count(), 1);
        assert_eq!(store.survey("s1").unwrap(), s);
    }

    #[tokio::test]
    async fn test_upsert_photo_uses_filename_id() {
        let store = MemoryStore::new();
        let id = store.upsert_photo("p1.jpg", b"jpeg").await.unwrap();
        assert_eq!(id, "p1");
        assert_eq!(store.resolve_photo("p1").await.unwrap().unwrap().bytes, b"jpeg");
        assert!(store.resolve_photo("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let store = MemoryStore::new();
        store.upsert_survey(&survey("s0")).await.unwrap();

        assert!(store.begin_restore().await.unwrap());
        store.upsert_survey(&survey("s1")).await.unwrap();
        store.upsert_photo("p1.jpg", b"x").await.unwrap();
        store.rollback_restore().await.unwrap();

        assert_eq!(store.survey_count(), 1);
        assert!(store.survey("s0").is_some());
        assert_eq!(store.photo_count(), 0);
    }

    #[tokio::test]
    async fn test_without_transactions() {
        let store = MemoryStore::without_transactions();
        assert!(!store.begin_restore().await.unwrap());
    }
}
