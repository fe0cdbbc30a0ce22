//! AX4 Archive - SQLite Store
//!
//! Records are kept as JSON payloads keyed by ID, photos as blobs. Restores
//! run inside a single `BEGIN IMMEDIATE` transaction on the shared connection.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{photo_id_from_filename, PhotoStore, RecordStore};
use crate::error::ArchiveResult;
use crate::model::{Item, PhotoBlob, Room, Survey};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS surveys (
        id TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY,
        survey_id TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS items (
        id TEXT PRIMARY KEY,
        survey_id TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS photos (
        id TEXT PRIMARY KEY,
        filename TEXT NOT NULL,
        data BLOB NOT NULL,
        captured_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_rooms_survey ON rooms(survey_id);
    CREATE INDEX IF NOT EXISTS idx_items_survey ON items(survey_id);
"#;

/// SQLite-backed record and photo store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    in_restore: Mutex<bool>,
}

impl SqliteStore {
    /// Open (or create) a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> ArchiveResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> ArchiveResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ArchiveResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            in_restore: Mutex::new(false),
        })
    }

    /// Load a survey by ID
    pub fn survey(&self, survey_id: &str) -> anyhow::Result<Option<Survey>> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row("SELECT data FROM surveys WHERE id = ?1", params![survey_id], |row| row.get(0))
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Items of a survey, ordered by ID
    pub fn items_for_survey(&self, survey_id: &str) -> anyhow::Result<Vec<Item>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM items WHERE survey_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![survey_id], |row| row.get::<_, String>(0))?;

        let mut items = Vec::new();
        for json in rows {
            items.push(serde_json::from_str(&json?)?);
        }
        Ok(items)
    }

    /// Row counts per table
    pub fn stats(&self) -> anyhow::Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |table: &str| -> rusqlite::Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            surveys: count("surveys")?,
            rooms: count("rooms")?,
            items: count("items")?,
            photos: count("photos")?,
        })
    }

    /// Store a photo under an explicit ID
    pub fn insert_photo(&self, photo: &PhotoBlob) -> anyhow::Result<()> {
        let captured_at = photo.captured_at.unwrap_or_else(Utc::now);
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO photos (id, filename, data, captured_at) VALUES (?1, ?2, ?3, ?4)",
            params![photo.photo_id, photo.filename, photo.bytes, captured_at.to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub surveys: usize,
    pub rooms: usize,
    pub items: usize,
    pub photos: usize,
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_survey(&self, survey: &Survey) -> anyhow::Result<()> {
        let json = serde_json::to_string(survey)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO surveys (id, data, updated_at) VALUES (?1, ?2, ?3)",
            params![survey.survey_id, json, survey.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn upsert_room(&self, room: &Room) -> anyhow::Result<()> {
        let json = serde_json::to_string(room)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO rooms (id, survey_id, data) VALUES (?1, ?2, ?3)",
            params![room.room_id, room.survey_id, json],
        )?;
        Ok(())
    }

    async fn upsert_item(&self, item: &Item) -> anyhow::Result<()> {
        let json = serde_json::to_string(item)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO items (id, survey_id, data) VALUES (?1, ?2, ?3)",
            params![item.item_id, item.survey_id, json],
        )?;
        Ok(())
    }

    async fn begin_restore(&self) -> anyhow::Result<bool> {
        let mut in_restore = self.in_restore.lock();
        if *in_restore {
            anyhow::bail!("a restore is already in progress");
        }
        self.conn.lock().execute_batch("BEGIN IMMEDIATE")?;
        *in_restore = true;
        Ok(true)
    }

    async fn commit_restore(&self) -> anyhow::Result<()> {
        // A failed COMMIT leaves the transaction open for rollback_restore
        *self.in_restore.lock() = false;
        self.conn.lock().execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback_restore(&self) -> anyhow::Result<()> {
        *self.in_restore.lock() = false;
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

#[async_trait]
impl PhotoStore for SqliteStore {
    async fn resolve_photo(&self, photo_id: &str) -> anyhow::Result<Option<PhotoBlob>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT filename, data, captured_at FROM photos WHERE id = ?1",
                params![photo_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((filename, bytes, captured_at)) = row else {
            return Ok(None);
        };

        let captured_at = DateTime::parse_from_rfc3339(&captured_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Some(PhotoBlob {
            photo_id: photo_id.to_string(),
            filename,
            bytes,
            captured_at,
        }))
    }

    async fn upsert_photo(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let photo_id = photo_id_from_filename(filename).to_string();
        if photo_id.is_empty() {
            anyhow::bail!("photo filename {:?} carries no ID", filename);
        }

        self.conn.lock().execute(
            "INSERT INTO photos (id, filename, data, captured_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET filename = excluded.filename, data = excluded.data",
            params![photo_id, filename, bytes, Utc::now().to_rfc3339()],
        )?;
        Ok(photo_id)
    }
}
