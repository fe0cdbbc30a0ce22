//! AX4 Archive - Container Packing
//!
//! Layout of the plaintext container:
//! ```text
//! survey.json              canonical SurveyData (pretty JSON)
//! photos/<photoId>.<ext>   one entry per resolved photo
//! ```

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use log::{debug, warn};
use zeroize::Zeroizing;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::model::{PhotoBlob, SurveyData};
use crate::store::PhotoStore;

/// Entry holding the record document
pub const DOCUMENT_ENTRY: &str = "survey.json";

/// Folder holding photo entries
pub const PHOTO_DIR: &str = "photos/";

const DEFAULT_PHOTO_EXT: &str = "jpg";

/// Result of packing a record graph
pub struct PackOutcome {
    /// Container bytes
    pub bytes: Zeroizing<Vec<u8>>,
    /// Photos written into the container
    pub packed_photos: usize,
    /// Referenced photo IDs the store could not supply
    pub missing_photos: Vec<String>,
}

/// Unpacked container contents
#[derive(Debug, Default)]
pub struct ArchiveBundle {
    /// Raw `survey.json`
    pub document: Vec<u8>,
    /// Photo filename (without folder) to content
    pub photos: BTreeMap<String, Vec<u8>>,
}

/// Serialize the record graph and bundle every photo it references
pub async fn pack(
    data: &SurveyData,
    photo_store: &dyn PhotoStore,
    config: &ArchiveConfig,
) -> ArchiveResult<PackOutcome> {
    let document = serde_json::to_vec_pretty(data)?;

    let mut resolved = Vec::new();
    let mut missing_photos = Vec::new();
    for photo_id in data.unique_photo_ids() {
        match photo_store.resolve_photo(&photo_id).await {
            Ok(Some(photo)) => resolved.push(photo),
            Ok(None) => {
                warn!("{}, skipping", ArchiveError::PhotoMissing(photo_id.clone()));
                missing_photos.push(photo_id);
            }
            Err(e) => {
                warn!("{} ({}), skipping", ArchiveError::PhotoMissing(photo_id.clone()), e);
                missing_photos.push(photo_id);
            }
        }
    }

    let bytes = write_container(&document, &resolved, config)?;
    debug!(
        "packed {} bytes: {} photos, {} missing",
        bytes.len(),
        resolved.len(),
        missing_photos.len()
    );

    Ok(PackOutcome {
        bytes,
        packed_photos: resolved.len(),
        missing_photos,
    })
}

fn write_container(
    document: &[u8],
    photos: &[PhotoBlob],
    config: &ArchiveConfig,
) -> ArchiveResult<Zeroizing<Vec<u8>>> {
    let options = FileOptions::default().compression_method(config.compression.method());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(DOCUMENT_ENTRY, options)?;
    zip.write_all(document)?;

    for photo in photos {
        zip.start_file(photo_entry_name(photo), options)?;
        zip.write_all(&photo.bytes)?;
    }

    let cursor = zip.finish()?;
    Ok(Zeroizing::new(cursor.into_inner()))
}

/// Container path for a photo; the stem is always the photo ID
pub fn photo_entry_name(photo: &PhotoBlob) -> String {
    let ext = photo
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_PHOTO_EXT.to_string());

    format!("{}{}.{}", PHOTO_DIR, photo.photo_id, ext)
}

/// Split container bytes back into the record document and photos
pub fn unpack(bytes: &[u8], config: &ArchiveConfig) -> ArchiveResult<ArchiveBundle> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut bundle = ArchiveBundle::default();
    let mut document = None;

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        if !is_safe_entry_name(&name) {
            return Err(ArchiveError::CorruptContainer(format!("unsafe entry name {:?}", name)));
        }
        if file.size() > config.max_entry_bytes {
            return Err(ArchiveError::CorruptContainer(format!(
                "entry {} is {} bytes (max {})",
                name,
                file.size(),
                config.max_entry_bytes
            )));
        }

        let mut content = Vec::with_capacity(file.size() as usize);
        (&mut file)
            .take(config.max_entry_bytes + 1)
            .read_to_end(&mut content)
            .map_err(|e| ArchiveError::CorruptContainer(format!("entry {}: {}", name, e)))?;
        if content.len() as u64 > config.max_entry_bytes {
            return Err(ArchiveError::CorruptContainer(format!("entry {} exceeds size limit", name)));
        }

        if name == DOCUMENT_ENTRY {
            document = Some(content);
        } else if let Some(filename) = name.strip_prefix(PHOTO_DIR).filter(|f| !f.contains('/')) {
            bundle.photos.insert(filename.to_string(), content);
        } else {
            debug!("ignoring unknown container entry {}", name);
        }
    }

    bundle.document = document
        .ok_or_else(|| ArchiveError::CorruptContainer(format!("{} not found", DOCUMENT_ENTRY)))?;
    Ok(bundle)
}

fn is_safe_entry_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && name.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}
