//! AX4 Archive - Unified Public API
//!
//! Single entry point for exporting and importing `.ax4zip` archives.
//! Storage is injected through `RecordStore` / `PhotoStore`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::ArchiveConfig;
use crate::envelope::{self, EnvelopeHeader, ARCHIVE_EXTENSION};
use crate::error::{ArchiveError, ArchiveResult};
use crate::model::{Item, Room, Survey, SurveyData};
use crate::packer;
use crate::restore::{RestoreCoordinator, RestoreReport};
use crate::schema;
use crate::secure_fs;
use crate::store::{PhotoStore, RecordStore};

pub use crate::restore::{ImportObserver, ImportStage};

// ═══════════════════════════════════════════════════════════════════════════════
// STATES & REPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Export state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportStage {
    Idle,
    Packing,
    Sealing,
    Written,
    Failed,
}

/// Observer for export stage transitions
pub type ExportObserver = dyn Fn(ExportStage) + Send + Sync;

/// Export summary
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub survey_id: String,
    pub rooms: usize,
    pub items: usize,
    pub packed_photos: usize,
    /// Referenced photos the store could not supply
    pub missing_photos: Vec<String>,
    /// Hex SHA-256 of the archive bytes
    pub fingerprint: String,
    pub exported_at: DateTime<Utc>,
}

/// A sealed archive ready to hand to the user
#[derive(Debug, Clone)]
pub struct ExportedArchive {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub report: ExportReport,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARCHIVE SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

/// AX4 Archive API
///
/// ```rust,ignore
/// use ax4_archive::{ArchiveService, SqliteStore};
///
/// let store = Arc::new(SqliteStore::open("ax4.db")?);
/// let service = ArchiveService::new(store.clone(), store);
///
/// let archive = service.export_archive(&data, &passphrase).await?;
/// let report = service.import_archive(&archive.bytes, &passphrase).await?;
/// ```
pub struct ArchiveService {
    records: Arc<dyn RecordStore>,
    photos: Arc<dyn PhotoStore>,
    config: ArchiveConfig,
    export_stage: RwLock<ExportStage>,
    import_stage: RwLock<ImportStage>,
    export_observer: Option<Arc<ExportObserver>>,
    import_observer: Option<Arc<ImportObserver<'static>>>,
}

impl ArchiveService {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a service with default configuration
    pub fn new(records: Arc<dyn RecordStore>, photos: Arc<dyn PhotoStore>) -> Self {
        Self {
            records,
            photos,
            config: ArchiveConfig::default(),
            export_stage: RwLock::new(ExportStage::Idle),
            import_stage: RwLock::new(ImportStage::Idle),
            export_observer: None,
            import_observer: None,
        }
    }

    /// Create a service with custom configuration
    pub fn with_config(
        records: Arc<dyn RecordStore>,
        photos: Arc<dyn PhotoStore>,
        config: ArchiveConfig,
    ) -> ArchiveResult<Self> {
        config.validate()?;
        let mut service = Self::new(records, photos);
        service.config = config;
        Ok(service)
    }

    pub fn on_export_stage(mut self, observer: Arc<ExportObserver>) -> Self {
        self.export_observer = Some(observer);
        self
    }

    pub fn on_import_stage(mut self, observer: Arc<ImportObserver<'static>>) -> Self {
        self.import_observer = Some(observer);
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Stage reached by the most recent export
    pub fn export_stage(&self) -> ExportStage {
        *self.export_stage.read()
    }

    /// Stage reached by the most recent import
    pub fn import_stage(&self) -> ImportStage {
        *self.import_stage.read()
    }

    fn enter_export(&self, stage: ExportStage) {
        debug!("export stage: {:?}", stage);
        *self.export_stage.write() = stage;
        if let Some(observer) = &self.export_observer {
            observer(stage);
        }
    }

    // RestoreCoordinator logs the stages it drives
    fn enter_import(&self, stage: ImportStage) {
        *self.import_stage.write() = stage;
        if let Some(observer) = &self.import_observer {
            observer(stage);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Seal a survey with its rooms, items and photos into archive bytes
    pub async fn export_archive(
        &self,
        data: &SurveyData,
        passphrase: &SecretString,
    ) -> ArchiveResult<ExportedArchive> {
        self.enter_export(ExportStage::Idle);
        match self.build_archive(data, passphrase).await {
            Ok(archive) => {
                self.enter_export(ExportStage::Written);
                Ok(archive)
            }
            Err(e) => {
                self.enter_export(ExportStage::Failed);
                Err(e)
            }
        }
    }

    /// `export_archive` taking the record graph in pieces
    pub async fn export_parts(
        &self,
        survey: Survey,
        rooms: Vec<Room>,
        items: Vec<Item>,
        passphrase: &SecretString,
    ) -> ArchiveResult<ExportedArchive> {
        let data = SurveyData { survey, rooms, items };
        self.export_archive(&data, passphrase).await
    }

    /// Export into `dir` under the suggested file name; returns the path written
    pub async fn export_to_file(
        &self,
        data: &SurveyData,
        passphrase: &SecretString,
        dir: &Path,
    ) -> ArchiveResult<(PathBuf, ExportReport)> {
        self.enter_export(ExportStage::Idle);
        let result = async {
            let archive = self.build_archive(data, passphrase).await?;
            let path = dir.join(&archive.file_name);
            secure_fs::write_atomic(&path, &archive.bytes).await?;
            Ok::<_, ArchiveError>((path, archive.report))
        }
        .await;

        match result {
            Ok((path, report)) => {
                self.enter_export(ExportStage::Written);
                info!("archive written to {}", path.display());
                Ok((path, report))
            }
            Err(e) => {
                self.enter_export(ExportStage::Failed);
                Err(e)
            }
        }
    }

    async fn build_archive(&self, data: &SurveyData, passphrase: &SecretString) -> ArchiveResult<ExportedArchive> {
        check_export_passphrase(passphrase, self.config.min_passphrase_len)?;
        schema::validate(data)?;

        self.enter_export(ExportStage::Packing);
        let packed = packer::pack(data, self.photos.as_ref(), &self.config).await?;

        self.enter_export(ExportStage::Sealing);
        let sealed = envelope::seal(&packed.bytes, passphrase, &data.survey.survey_id).await?;
        let bytes = sealed.to_bytes()?;
        let size = bytes.len() as u64;
        if size > self.config.max_archive_bytes {
            return Err(ArchiveError::ArchiveTooLarge {
                size,
                max: self.config.max_archive_bytes,
            });
        }

        let report = ExportReport {
            survey_id: data.survey.survey_id.clone(),
            rooms: data.rooms.len(),
            items: data.items.len(),
            packed_photos: packed.packed_photos,
            missing_photos: packed.missing_photos,
            fingerprint: sealed.fingerprint()?,
            exported_at: sealed.exported_at,
        };
        info!(
            "exported survey {}: {} rooms, {} items, {} photos ({} missing), {} bytes, sha256 {}",
            report.survey_id,
            report.rooms,
            report.items,
            report.packed_photos,
            report.missing_photos.len(),
            size,
            report.fingerprint
        );

        Ok(ExportedArchive {
            bytes,
            file_name: suggested_file_name(&data.survey),
            report,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // IMPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Decrypt, validate and persist an archive
    pub async fn import_archive(&self, bytes: &[u8], passphrase: &SecretString) -> ArchiveResult<RestoreReport> {
        let observer = |stage: ImportStage| self.enter_import(stage);
        RestoreCoordinator::new(self.records.as_ref(), self.photos.as_ref(), &self.config)
            .with_observer(&observer)
            .restore(bytes, passphrase)
            .await
    }

    /// Read an archive file and import it
    pub async fn import_from_file(&self, path: &Path, passphrase: &SecretString) -> ArchiveResult<RestoreReport> {
        let bytes = match secure_fs::read_limited(path, self.config.max_archive_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                for stage in [ImportStage::Idle, ImportStage::Failed] {
                    debug!("import stage: {}", stage);
                    self.enter_import(stage);
                }
                return Err(e);
            }
        };
        self.import_archive(&bytes, passphrase).await
    }

    /// Plaintext header of an archive, for showing "exported at" before
    /// asking for the passphrase
    pub fn inspect(&self, bytes: &[u8]) -> ArchiveResult<EnvelopeHeader> {
        envelope::peek_header(bytes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Passphrase policy for new archives
pub fn check_export_passphrase(passphrase: &SecretString, min_len: usize) -> ArchiveResult<()> {
    let value = passphrase.expose_secret();
    if value.trim().is_empty() {
        return Err(ArchiveError::MissingPassphrase);
    }
    if value.chars().count() < min_len {
        return Err(ArchiveError::WeakPassphrase { min: min_len });
    }
    Ok(())
}

/// `<jobId>_<siteName>_encrypted.ax4zip`. The job ID is reduced to
/// `[A-Za-z0-9_-]` and the site name to `[A-Za-z0-9_]`, so the result is
/// always a single path component.
pub fn suggested_file_name(survey: &Survey) -> String {
    let job = name_component(&survey.job_id, &['-']);
    let site = name_component(&survey.site_name, &[]);
    format!("{}_{}_encrypted.{}", job, site, ARCHIVE_EXTENSION)
}

fn name_component(value: &str, keep: &[char]) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || keep.contains(&c) { c } else { '_' })
        .collect()
}

/// Whether a file name carries the archive extension
pub fn is_archive_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::PhotoBlob;
    use crate::store::{MemoryStore, SqliteStore};
    use tempfile::tempdir;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    fn jpeg(id: &str, size: usize) -> PhotoBlob {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend((0..size - 4).map(|i| (i * 7 % 256) as u8));
        PhotoBlob {
            photo_id: id.to_string(),
            filename: format!("{}.jpg", id),
            bytes,
            captured_at: Some(Utc::now()),
        }
    }

    fn memory_service(store: &Arc<MemoryStore>) -> ArchiveService {
        ArchiveService::new(store.clone(), store.clone())
    }

    /// Survey s1 / AX4-1 with two items referencing p1 (10KB) and p2 (20KB)
    fn scenario_source() -> (Arc<MemoryStore>, SurveyData) {
        let store = Arc::new(MemoryStore::new());
        store.insert_photo(jpeg("p1", 10 * 1024));
        store.insert_photo(jpeg("p2", 20 * 1024));
        let data = survey_data("s1", vec![item("s1", "i1", &["p1"]), item("s1", "i2", &["p2"])]);
        (store, data)
    }

    #[tokio::test]
    async fn test_export_import_scenario() {
        init_logging();
        let (source, data) = scenario_source();
        let archive = memory_service(&source)
            .export_archive(&data, &secret("Secret123!"))
            .await
            .unwrap();
        assert_eq!(archive.report.packed_photos, 2);
        assert_eq!(archive.file_name, "AX4-1_Main_St_Depot_encrypted.ax4zip");

        let target = Arc::new(MemoryStore::new());
        let report = memory_service(&target)
            .import_archive(&archive.bytes, &secret("Secret123!"))
            .await
            .unwrap();

        assert_eq!(report.survey_id, "s1");
        assert_eq!(target.survey_count(), 1);
        assert_eq!(target.item_count(), 2);
        assert_eq!(target.photo_count(), 2);
        for id in ["p1", "p2"] {
            assert_eq!(target.photo(id).unwrap().bytes, source.photo(id).unwrap().bytes);
        }
    }

    #[tokio::test]
    async fn test_wrong_passphrase_leaves_stores_untouched() {
        let (source, data) = scenario_source();
        let archive = memory_service(&source)
            .export_archive(&data, &secret("Secret123!"))
            .await
            .unwrap();

        let target = Arc::new(MemoryStore::new());
        let service = memory_service(&target);
        let result = service.import_archive(&archive.bytes, &secret("wrong")).await;

        assert!(matches!(result, Err(ArchiveError::DecryptionAuthFailure)));
        assert_eq!(service.import_stage(), ImportStage::Failed);
        assert_eq!(target.survey_count(), 0);
        assert_eq!(target.item_count(), 0);
        assert_eq!(target.photo_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_passphrase_rejected_before_packing() {
        let store = Arc::new(MemoryStore::new());
        let stages = Arc::new(RwLock::new(Vec::new()));
        let seen = stages.clone();
        let service = memory_service(&store).on_export_stage(Arc::new(move |s: ExportStage| seen.write().push(s)));

        let result = service.export_archive(&survey_data("s1", vec![]), &secret("")).await;

        assert!(matches!(result, Err(ArchiveError::MissingPassphrase)));
        assert_eq!(*stages.read(), vec![ExportStage::Idle, ExportStage::Failed]);
    }

    #[tokio::test]
    async fn test_short_passphrase_is_weak() {
        let store = Arc::new(MemoryStore::new());
        let result = memory_service(&store)
            .export_archive(&survey_data("s1", vec![]), &secret("abc"))
            .await;
        assert!(matches!(result, Err(ArchiveError::WeakPassphrase { min: 8 })));
    }

    #[tokio::test]
    async fn test_invalid_graph_rejected_on_export() {
        let store = Arc::new(MemoryStore::new());
        let data = survey_data("s1", vec![item("s2", "i1", &[])]);
        let result = memory_service(&store).export_archive(&data, &secret("Secret123!")).await;
        assert!(matches!(result, Err(ArchiveError::SchemaValidationFailure(_))));
    }

    #[tokio::test]
    async fn test_export_stages() {
        let (source, data) = scenario_source();
        let stages = Arc::new(RwLock::new(Vec::new()));
        let seen = stages.clone();
        let service = memory_service(&source).on_export_stage(Arc::new(move |s: ExportStage| seen.write().push(s)));

        service.export_archive(&data, &secret("Secret123!")).await.unwrap();

        assert_eq!(
            *stages.read(),
            vec![ExportStage::Idle, ExportStage::Packing, ExportStage::Sealing, ExportStage::Written]
        );
        assert_eq!(service.export_stage(), ExportStage::Written);
    }

    #[tokio::test]
    async fn test_missing_photo_reported_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.insert_photo(jpeg("p1", 512));
        let data = survey_data("s1", vec![item("s1", "i1", &["p1"]), item("s1", "i2", &["p9"])]);

        let archive = memory_service(&store)
            .export_archive(&data, &secret("Secret123!"))
            .await
            .unwrap();
        assert_eq!(archive.report.packed_photos, 1);
        assert_eq!(archive.report.missing_photos, vec!["p9".to_string()]);

        let target = Arc::new(MemoryStore::new());
        let report = memory_service(&target)
            .import_archive(&archive.bytes, &secret("Secret123!"))
            .await
            .unwrap();
        assert_eq!(report.unresolved_photo_refs, vec!["p9".to_string()]);
        assert_eq!(target.item_count(), 2);
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let (source, data) = scenario_source();
        let archive = memory_service(&source)
            .export_archive(&data, &secret("Secret123!"))
            .await
            .unwrap();

        let target = Arc::new(MemoryStore::new());
        let service = memory_service(&target);
        for _ in 0..3 {
            service.import_archive(&archive.bytes, &secret("Secret123!")).await.unwrap();
        }

        assert_eq!(target.survey_count(), 1);
        assert_eq!(target.room_count(), 1);
        assert_eq!(target.item_count(), 2);
        assert_eq!(target.photo_count(), 2);
        assert_eq!(target.survey("s1").unwrap(), data.survey);
        assert_eq!(target.item("i2").unwrap(), data.items[1]);
    }

    #[tokio::test]
    async fn test_file_roundtrip_into_sqlite() {
        init_logging();
        let dir = tempdir().unwrap();
        let (source, data) = scenario_source();

        let (path, report) = memory_service(&source)
            .export_to_file(&data, &secret("Secret123!"), dir.path())
            .await
            .unwrap();
        assert!(is_archive_file_name(&path.to_string_lossy()));
        assert_eq!(report.packed_photos, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let db = Arc::new(SqliteStore::open(dir.path().join("ax4.db")).unwrap());
        let service = ArchiveService::new(db.clone(), db.clone());
        let header = service.inspect(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(header.source_survey_id, "s1");

        let restored = service.import_from_file(&path, &secret("Secret123!")).await.unwrap();
        assert!(restored.transactional);
        assert_eq!(service.import_stage(), ImportStage::Done);

        let stats = db.stats().unwrap();
        assert_eq!((stats.surveys, stats.rooms, stats.items, stats.photos), (1, 1, 2, 2));
        assert_eq!(db.survey("s1").unwrap().unwrap(), data.survey);
    }

    #[tokio::test]
    async fn test_failed_export_leaves_no_file() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let result = memory_service(&store)
            .export_to_file(&survey_data("s1", vec![]), &secret(""), dir.path())
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_archive_size_limit() {
        let (source, data) = scenario_source();
        let config = ArchiveConfig {
            max_archive_bytes: 256,
            ..Default::default()
        };
        let stages = Arc::new(RwLock::new(Vec::new()));
        let seen = stages.clone();
        let service = ArchiveService::with_config(source.clone(), source.clone(), config)
            .unwrap()
            .on_import_stage(Arc::new(move |s: ImportStage| seen.write().push(s)));
        let result = service.export_archive(&data, &secret("Secret123!")).await;
        assert!(matches!(result, Err(ArchiveError::ArchiveTooLarge { max: 256, .. })));

        let oversized = vec![b' '; 2048];
        let result = service.import_archive(&oversized, &secret("Secret123!")).await;
        assert!(matches!(result, Err(ArchiveError::ArchiveTooLarge { size: 2048, .. })));
        assert_eq!(*stages.read(), vec![ImportStage::Idle, ImportStage::Failed]);
    }

    #[tokio::test]
    async fn test_shared_photos_imported_once() {
        let source = Arc::new(MemoryStore::new());
        source.insert_photo(jpeg("p1", 10 * 1024));
        source.insert_photo(jpeg("p2", 20 * 1024));
        let data = survey_data(
            "s1",
            vec![
                item("s1", "i1", &["p1"]),
                item("s1", "i2", &["p1"]),
                item("s1", "i3", &["p2"]),
            ],
        );

        let archive = memory_service(&source)
            .export_archive(&data, &secret("Secret123!"))
            .await
            .unwrap();
        assert_eq!(archive.report.packed_photos, 2);

        let target = Arc::new(MemoryStore::new());
        let report = memory_service(&target)
            .import_archive(&archive.bytes, &secret("Secret123!"))
            .await
            .unwrap();

        assert_eq!(report.photos, 2);
        assert_eq!(target.item_count(), 3);
        assert_eq!(target.photo_count(), 2);
        for id in ["p1", "p2"] {
            assert_eq!(target.photo(id).unwrap().bytes, source.photo(id).unwrap().bytes);
        }
    }

    #[tokio::test]
    async fn test_export_file_stays_in_target_dir() {
        let root = tempdir().unwrap();
        let exports = root.path().join("exports");
        std::fs::create_dir(&exports).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut data = survey_data("s1", vec![]);
        data.survey.job_id = "../escaped".to_string();

        let (path, _) = memory_service(&store)
            .export_to_file(&data, &secret("Secret123!"), &exports)
            .await
            .unwrap();

        assert_eq!(path.parent(), Some(exports.as_path()));
        assert_eq!(path.file_name().unwrap(), "___escaped_Main_St_Depot_encrypted.ax4zip");
        assert_eq!(std::fs::read_dir(&exports).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_suggested_file_name() {
        let mut survey = survey("s1");
        survey.job_id = "J-77".to_string();
        survey.site_name = "12 High St. (Unit 4)".to_string();
        assert_eq!(suggested_file_name(&survey), "J-77_12_High_St___Unit_4__encrypted.ax4zip");

        survey.job_id = "..\\jobs/../x".to_string();
        assert_eq!(suggested_file_name(&survey), "___jobs____x_12_High_St___Unit_4__encrypted.ax4zip");
    }

    #[test]
    fn test_is_archive_file_name() {
        assert!(is_archive_file_name("AX4-1_Site_encrypted.ax4zip"));
        assert!(is_archive_file_name("backup.AX4ZIP"));
        assert!(!is_archive_file_name("backup.zip"));
        assert!(!is_archive_file_name("ax4zip"));
    }
}
