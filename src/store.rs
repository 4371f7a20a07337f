//! JSON file primitives shared by the watcher registry and the dedup ledger.
//!
//! Reads treat a missing or empty file as an empty collection. Writes replace
//! the whole file through a temp file and a rename, so a concurrent reader sees
//! either the old content or the new content, never a partial write.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PollError, Result};

/// Read a JSON document, returning `T::default()` when the file is missing or empty.
pub fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(PollError::storage(path, e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    // `null` is what an empty slice used to serialize to.
    let value: Option<T> = serde_json::from_slice(&bytes)
        .map_err(|e| PollError::storage(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
    Ok(value.unwrap_or_default())
}

/// Serialize `value` and atomically replace the file at `path` with it.
pub fn write_json_atomic<T>(path: &Path, value: &T, pretty: bool) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let json = if pretty {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    }
    .map_err(|e| PollError::storage(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PollError::storage(parent, e))?;
    }

    let temp_path = temp_path_for(path);
    let cleanup_and_err = |e: io::Error| {
        let _ = fs::remove_file(&temp_path);
        PollError::storage(path, e)
    };

    let mut file = fs::File::create(&temp_path).map_err(|e| PollError::storage(&temp_path, e))?;
    file.write_all(&json).map_err(cleanup_and_err)?;
    file.sync_all().map_err(cleanup_and_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(cleanup_and_err)?;
    Ok(())
}

/// Move an undecodable file aside as `<name>.corrupt-<UTC timestamp>` so the
/// next write starts from an empty document. Returns the new location.
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
    let target = path.with_file_name(name);
    fs::rename(path, &target).map_err(|e| PollError::storage(path, e))?;
    Ok(target)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(".tmp");
    path.with_file_name(name)
}
