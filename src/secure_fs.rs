//! AX4 Archive - Archive File I/O
//!
//! Archives are written to a temporary sibling and renamed into place, so a
//! failed export never leaves a partial `.ax4zip` behind.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ArchiveError, ArchiveResult};

/// Write `data` to `path` atomically
pub async fn write_atomic(path: &Path, data: &[u8]) -> ArchiveResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_sibling(path);
    if let Err(e) = write_and_sync(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    // Rename is atomic on the same filesystem
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    Ok(())
}

async fn write_and_sync(path: &Path, data: &[u8]) -> ArchiveResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Read a whole file, refusing anything larger than `max_bytes`
pub async fn read_limited(path: &Path, max_bytes: u64) -> ArchiveResult<Vec<u8>> {
    let size = fs::metadata(path).await?.len();
    if size > max_bytes {
        return Err(ArchiveError::ArchiveTooLarge { size, max: max_bytes });
    }
    Ok(fs::read(path).await?)
}
