//! AX4 Archive - Restore Coordinator
//!
//! Import pipeline: `Opening -> Unpacking -> Validating -> Persisting -> Done`.
//! Nothing is written before validation succeeds. Writes go survey, rooms,
//! photos, items, so photo references are resolvable when items land.

use std::collections::HashSet;
use std::fmt;

use log::{debug, error, info, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::ArchiveConfig;
use crate::envelope;
use crate::error::{ArchiveError, ArchiveResult};
use crate::model::SurveyData;
use crate::packer::{self, ArchiveBundle};
use crate::schema;
use crate::store::{photo_id_from_filename, PhotoStore, RecordStore};

/// Import state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportStage {
    Idle,
    Opening,
    Unpacking,
    Validating,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Unpacking => "unpacking",
            Self::Validating => "validating",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a completed restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Restored survey, for navigation
    pub survey_id: String,
    pub rooms: usize,
    pub items: usize,
    pub photos: usize,
    /// Photo IDs referenced by items but absent from the archive
    pub unresolved_photo_refs: Vec<String>,
    /// Whether the writes ran inside a store transaction
    pub transactional: bool,
}

/// Observer for stage transitions
pub type ImportObserver<'a> = dyn Fn(ImportStage) + Send + Sync + 'a;

/// Decrypts, validates and persists one archive
pub struct RestoreCoordinator<'a> {
    records: &'a dyn RecordStore,
    photos: &'a dyn PhotoStore,
    config: &'a ArchiveConfig,
    observer: Option<&'a ImportObserver<'a>>,
}

impl<'a> RestoreCoordinator<'a> {
    pub fn new(records: &'a dyn RecordStore, photos: &'a dyn PhotoStore, config: &'a ArchiveConfig) -> Self {
        Self {
            records,
            photos,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a ImportObserver<'a>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn enter(&self, stage: ImportStage) {
        debug!("import stage: {}", stage);
        if let Some(observer) = self.observer {
            observer(stage);
        }
    }

    /// Restore an archive, returning what was written
    pub async fn restore(&self, envelope_bytes: &[u8], passphrase: &SecretString) -> ArchiveResult<RestoreReport> {
        self.enter(ImportStage::Idle);
        match self.run(envelope_bytes, passphrase).await {
            Ok(report) => {
                self.enter(ImportStage::Done);
                info!(
                    "restored survey {}: {} rooms, {} items, {} photos",
                    report.survey_id, report.rooms, report.items, report.photos
                );
                Ok(report)
            }
            Err(e) => {
                self.enter(ImportStage::Failed);
                Err(e)
            }
        }
    }

    async fn run(&self, envelope_bytes: &[u8], passphrase: &SecretString) -> ArchiveResult<RestoreReport> {
        let size = envelope_bytes.len() as u64;
        if size > self.config.max_archive_bytes {
            return Err(ArchiveError::ArchiveTooLarge {
                size,
                max: self.config.max_archive_bytes,
            });
        }
        if passphrase.expose_secret().trim().is_empty() {
            return Err(ArchiveError::MissingPassphrase);
        }

        self.enter(ImportStage::Opening);
        let packed = envelope::open(envelope_bytes, passphrase).await?;

        self.enter(ImportStage::Unpacking);
        let bundle = packer::unpack(&packed, self.config)?;
        drop(packed);

        self.enter(ImportStage::Validating);
        let data = schema::parse_document(&bundle.document)?;
        let unresolved = unresolved_photo_refs(&data, &bundle);
        for photo_id in &unresolved {
            warn!("photo {} is referenced but not in the archive", photo_id);
        }

        self.enter(ImportStage::Persisting);
        // One record transaction only covers photos written to the same store
        let shared = self.stores_shared();
        let records_tx = self.records.begin_restore().await.map_err(ArchiveError::Store)?;
        let transactional = records_tx && shared;
        if !transactional && self.config.require_transactional_restore {
            if records_tx {
                self.rollback().await;
            }
            return Err(ArchiveError::RestoreNotTransactional);
        }

        let persisted = self.persist(&data, &bundle).await;
        let photos = match persisted {
            Ok(photos) => photos,
            Err(e) => {
                if records_tx {
                    self.rollback().await;
                }
                if !transactional {
                    error!(
                        "restore of survey {} failed while persisting; stores cannot roll back together, partial data may remain",
                        data.survey.survey_id
                    );
                }
                return Err(e);
            }
        };

        if records_tx {
            if let Err(e) = self.records.commit_restore().await {
                self.rollback().await;
                return Err(ArchiveError::Store(e.context("failed to commit restore")));
            }
        }
        Ok(self.report(&data, photos, unresolved, transactional))
    }

    async fn rollback(&self) {
        if let Err(e) = self.records.rollback_restore().await {
            error!("rollback of failed restore also failed: {}", e);
        }
    }

    fn stores_shared(&self) -> bool {
        std::ptr::eq(
            self.records as *const _ as *const u8,
            self.photos as *const _ as *const u8,
        )
    }

    async fn persist(&self, data: &SurveyData, bundle: &ArchiveBundle) -> ArchiveResult<usize> {
        self.records
            .upsert_survey(&data.survey)
            .await
            .map_err(|e| store_error(e, "survey", &data.survey.survey_id))?;

        for room in &data.rooms {
            self.records
                .upsert_room(room)
                .await
                .map_err(|e| store_error(e, "room", &room.room_id))?;
        }

        for (filename, bytes) in &bundle.photos {
            let stored_id = self
                .photos
                .upsert_photo(filename, bytes)
                .await
                .map_err(|e| store_error(e, "photo", filename))?;
            let expected = photo_id_from_filename(filename);
            if stored_id != expected {
                warn!("photo {} stored as {}, item references may not resolve", expected, stored_id);
            }
        }

        for item in &data.items {
            self.records
                .upsert_item(item)
                .await
                .map_err(|e| store_error(e, "item", &item.item_id))?;
        }

        Ok(bundle.photos.len())
    }

    fn report(&self, data: &SurveyData, photos: usize, unresolved: Vec<String>, transactional: bool) -> RestoreReport {
        RestoreReport {
            survey_id: data.survey.survey_id.clone(),
            rooms: data.rooms.len(),
            items: data.items.len(),
            photos,
            unresolved_photo_refs: unresolved,
            transactional,
        }
    }
}

fn unresolved_photo_refs(data: &SurveyData, bundle: &ArchiveBundle) -> Vec<String> {
    let available: HashSet<&str> = bundle.photos.keys().map(|f| photo_id_from_filename(f)).collect();
    data.unique_photo_ids()
        .into_iter()
        .filter(|id| !available.contains(id.as_str()))
        .collect()
}

fn store_error(e: anyhow::Error, kind: &str, id: &str) -> ArchiveError {
    ArchiveError::Store(e.context(format!("failed to upsert {} {}", kind, id)))
}
