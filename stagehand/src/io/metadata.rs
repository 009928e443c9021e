//! Per-workspace version metadata (`state/metadata.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::version::{VersionBump, bump_version};
use crate::io::atomic::write_json_atomic;

/// Metadata describing the version a workspace directory holds.
///
/// The file is excluded from commits: it records the commit hash of the tree
/// it sits in, which cannot be part of that commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionMetadata {
    pub version: String,
    pub commit_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VersionMetadata {
    pub fn new(version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: version.into(),
            commit_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `bump` and return the new version.
    pub fn bump(&mut self, bump: VersionBump) -> Result<&str> {
        self.version = bump_version(&self.version, bump)?;
        self.updated_at = Utc::now();
        Ok(&self.version)
    }

    pub fn stamp_commit(&mut self, commit_hash: impl Into<String>) {
        self.commit_hash = Some(commit_hash.into());
        self.updated_at = Utc::now();
    }
}

/// Load metadata, returning `None` if the file does not exist.
pub fn load_metadata(path: &Path) -> Result<Option<VersionMetadata>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read metadata {}", path.display()))?;
    let metadata: VersionMetadata = serde_json::from_str(&contents)
        .with_context(|| format!("parse metadata {}", path.display()))?;
    debug!(version = %metadata.version, commit = ?metadata.commit_hash, "metadata loaded");
    Ok(Some(metadata))
}

/// Atomically write metadata to disk.
pub fn write_metadata(path: &Path, metadata: &VersionMetadata) -> Result<()> {
    debug!(path = %path.display(), version = %metadata.version, "writing metadata");
    write_json_atomic(path, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metadata_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_metadata(&temp.path().join("metadata.json")).expect("load").is_none());
    }

    #[test]
    fn bump_and_stamp_persist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("metadata.json");
        let mut metadata = VersionMetadata::new("0.0.0");
        metadata.bump(VersionBump::Patch).expect("bump");
        metadata.stamp_commit("abc123");
        write_metadata(&path, &metadata).expect("write");

        let loaded = load_metadata(&path).expect("load").expect("present");
        assert_eq!(loaded.version, "0.0.1");
        assert_eq!(loaded.commit_hash.as_deref(), Some("abc123"));
        assert_eq!(loaded, metadata);
    }
}
