//! Common utilities
//!
//! Output directories, timestamps and JSON writing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Create `dir` (and parents) if needed and return it
pub fn ensure_dir(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).context(format!("Failed to create directory: {:?}", dir))?;
    Ok(dir.to_path_buf())
}

/// Timestamp usable in file names, e.g. `2025-05-07T14-03-09`
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Current time as RFC 3339
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// `<dir>/<prefix>_<stamp>.json`
pub fn stamped_path(dir: &Path, prefix: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}_{}.json", prefix, file_stamp(at)))
}

/// Pretty-print `value` as JSON into `path`, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).context(format!("Failed to write {:?}", path))?;
    tracing::debug!("Wrote {:?}", path);
    Ok(())
}
