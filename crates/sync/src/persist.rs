//! Whole-file JSON persistence with atomic replace.
//!
//! Writes go to a sibling temp file that is then renamed over the target,
//! so a crash mid-write leaves the previous file intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StateError;

/// Read and decode `path`. A missing or empty file is `None`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StateError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Encode `value` and atomically replace `path` with it.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let encoded = serde_json::to_vec_pretty(value).map_err(StateError::Encode)?;
    let write_err = |source| StateError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &encoded).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
