//! Crash-safe JSON file helpers.
//!
//! Records are written to a temporary file in the target directory and then
//! renamed over the destination, so a reader never observes a torn record.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PersistenceError, Result};

/// Creates `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| PersistenceError::DirectoryError {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Replaces the contents of `path` with `data` in one rename.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    ensure_dir(dir)?;

    let write_err = |source| PersistenceError::WriteError {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(data).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

/// Reads and deserializes a JSON file. A missing file is `Ok(None)`.
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::ReadError {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Removes a file. Returns false if it did not exist.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(PersistenceError::WriteError {
            path: path.to_path_buf(),
            source,
        }),
    }
}
