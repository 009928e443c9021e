//! Crash-safe file replacement (temp file + rename) and directory fsync.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

/// Atomically replace `path` with `contents`.
///
/// The temp file is flushed to disk before the rename so a reader never sees a
/// partially written file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create temp file {}", tmp_path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("write temp file {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync temp file {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Serialize `value` as pretty JSON (trailing newline) and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Flush directory entries (renames, creates) of `dir` to disk. Best effort.
pub fn sync_dir(dir: &Path) {
    match File::open(dir) {
        Ok(handle) => {
            if let Err(err) = handle.sync_all() {
                warn!(dir = %dir.display(), err = %err, "directory fsync failed");
            }
        }
        Err(err) => warn!(dir = %dir.display(), err = %err, "open directory for fsync failed"),
    }
}
