//! On-disk form of the submission index: one JSON object keyed by slug.

use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

use super::CacheError;
use crate::index::SubmissionIndex;

/// Reads the snapshot at `path`. A missing file is not an error, and an
/// empty JSON array reads as an empty index.
pub async fn read_snapshot(path: &Path) -> Result<Option<SubmissionIndex>, CacheError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let decode_err = |source| CacheError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(decode_err)?;
    let index = if value.as_array().is_some_and(Vec::is_empty) {
        SubmissionIndex::new()
    } else {
        serde_json::from_value(value).map_err(decode_err)?
    };
    info!("read snapshot {}", path.display());
    Ok(Some(index))
}

/// Writes `index` next to `path` and renames it into place, so a crash never
/// leaves a truncated snapshot behind.
pub async fn write_snapshot(path: &Path, index: &SubmissionIndex) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(index).map_err(CacheError::Encode)?;
    let tmp = temp_path(path);
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(source));
    }
    info!("wrote snapshot {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or(OsStr::new("submissions")));
    name.push(".tmp");
    path.with_file_name(name)
}
