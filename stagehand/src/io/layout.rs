//! Canonical paths inside a workspace and naming rules for workspace directories.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::io::config::LayoutConfig;

/// Suffix appended to a workspace directory name to form its staging clone.
pub const STAGING_SUFFIX: &str = ".staging";

/// All canonical paths for one workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDirectories {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub active_state_file: PathBuf,
    pub staging_state_file: PathBuf,
    pub lock_file: PathBuf,
    pub metadata_file: PathBuf,
    pub state_gitignore: PathBuf,
}

impl AgentDirectories {
    pub fn new(root: impl Into<PathBuf>, layout: &LayoutConfig) -> Self {
        let root = root.into();
        let state_dir = root.join(&layout.state_dirname);
        Self {
            root,
            active_state_file: state_dir.join(&layout.active_state_filename),
            staging_state_file: state_dir.join(&layout.staging_state_filename),
            lock_file: state_dir.join(&layout.lock_filename),
            metadata_file: state_dir.join(&layout.metadata_filename),
            state_gitignore: state_dir.join(".gitignore"),
            state_dir,
        }
    }

    /// Same layout re-rooted at `root` (used after clone or rename).
    pub fn rebase(&self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let relocate = |path: &Path| {
            path.strip_prefix(&self.root)
                .map(|rel| root.join(rel))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        Self {
            state_dir: relocate(&self.state_dir),
            active_state_file: relocate(&self.active_state_file),
            staging_state_file: relocate(&self.staging_state_file),
            lock_file: relocate(&self.lock_file),
            metadata_file: relocate(&self.metadata_file),
            state_gitignore: relocate(&self.state_gitignore),
            root,
        }
    }
}

/// Validate a single path segment used as a workspace or version name.
///
/// Segments become directory names under the workspace root, so they must not
/// escape it or collide with staging clones.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(anyhow!("name must not be empty"));
    }
    if segment == "." || segment == ".." {
        return Err(anyhow!("name must not be '.' or '..'"));
    }
    if segment
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("name must be [A-Za-z0-9._-] only (got '{segment}')"));
    }
    if segment.ends_with(STAGING_SUFFIX) {
        return Err(anyhow!("name must not end with '{STAGING_SUFFIX}'"));
    }
    Ok(())
}

/// Staging clone path for the workspace directory `dir`.
pub fn staging_path_for(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(STAGING_SUFFIX);
    dir.with_file_name(name)
}
