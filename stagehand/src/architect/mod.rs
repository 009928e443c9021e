//! Workspace lifecycle controller.
//!
//! A workspace moves `bootstrapping -> active(C) -> staging -> active(C')`:
//!
//! - [`Architect::start`] bootstraps a name-based directory and promotes it to
//!   `<workspace_root>/<commit>`.
//! - [`Architect::apply_feedback`] clones an active commit-addressed directory
//!   into a staging clone, lets the generator mutate it, and promotes the
//!   result to `<workspace_root>/<new commit>`.
//!
//! Promotion is a single directory rename. Anything that fails before that
//! rename removes the half-built directory, so partial state never appears
//! under a commit-addressed name and the source directory is never touched.

mod feedback;
mod start;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::core::types::Slot;
use crate::error::{Error, Result};
use crate::io::atomic::sync_dir;
use crate::io::config::AgentSettings;
use crate::io::generator::{GenerationOutput, GenerationRequest, Generator};
use crate::io::git::{CommitSummary, Git, Identity};
use crate::io::layout::{AgentDirectories, validate_segment};
use crate::locks::WorkspaceLocks;
use crate::registry::VersionRegistry;
use crate::state_store::StateStore;

pub use feedback::FeedbackOutcome;
pub use start::StartOutcome;

/// Orchestrates workspace bootstrap and feedback rounds.
///
/// Operations block on the generator and on git; async callers should run them
/// on a blocking-capable thread.
pub struct Architect {
    settings: AgentSettings,
    workspace_root: PathBuf,
    registry: Arc<VersionRegistry>,
    generator: Arc<dyn Generator>,
    locks: WorkspaceLocks,
}

impl Architect {
    /// Create the controller, ensuring the workspace root exists.
    pub fn new(
        settings: AgentSettings,
        registry: Arc<VersionRegistry>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let root = &settings.workspace_root;
        fs::create_dir_all(root)
            .with_context(|| format!("create workspace root {}", root.display()))?;
        // Clones are addressed by absolute path.
        let workspace_root = root
            .canonicalize()
            .with_context(|| format!("canonicalize {}", root.display()))?;
        info!(workspace_root = %workspace_root.display(), "architect ready");
        Ok(Self {
            settings,
            workspace_root,
            registry,
            generator,
            locks: WorkspaceLocks::new(),
        })
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Commit-addressed directory currently serving `version`.
    ///
    /// A directory named exactly `version` wins; otherwise the registry maps the
    /// version (or commit hash) to its directory.
    pub fn resolve_workspace(&self, version: &str) -> Result<PathBuf> {
        validate_segment(version)
            .map_err(|err| Error::InvalidInput(format!("version '{version}': {err}")))?;
        let direct = self.workspace_root.join(version);
        if direct.is_dir() {
            debug!(path = %direct.display(), "resolved by direct path");
            return Ok(direct);
        }
        let record = self
            .registry
            .get_by_version(version)
            .or_else(|| self.registry.get_by_commit(version))
            .ok_or_else(|| Error::NotFound(format!("version {version}")))?;
        let dir = self.workspace_root.join(&record.commit_hash);
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "workspace for version {version} (commit {})",
                record.commit_hash
            )));
        }
        debug!(path = %dir.display(), commit = %record.commit_hash, "resolved via registry");
        Ok(dir)
    }

    /// Most recent commits of the workspace serving `version`.
    pub fn history(&self, version: &str, limit: usize) -> Result<Vec<CommitSummary>> {
        let dir = self.resolve_workspace(version)?;
        Ok(self.git(&dir).log(limit)?)
    }

    fn paths_for(&self, root: impl Into<PathBuf>) -> AgentDirectories {
        self.settings.paths_for(root)
    }

    fn git(&self, dir: &Path) -> Git {
        Git::new(dir).with_identity(Identity {
            name: self.settings.git.author_name.clone(),
            email: self.settings.git.author_email.clone(),
        })
    }

    fn state_store(&self, dirs: AgentDirectories) -> StateStore {
        StateStore::new(dirs, self.settings.state_lock_timeout())
    }

    /// Run the generator, turning every failure mode into [`Error::Generation`].
    fn generate(&self, instruction: &str, workdir: &Path) -> Result<GenerationOutput> {
        let request = GenerationRequest {
            instruction: instruction.to_string(),
            workdir: workdir.to_path_buf(),
            timeout: self.settings.generation_timeout(),
        };
        let output = self
            .generator
            .run(&request)
            .map_err(|err| Error::generation(format!("{err:#}"), String::new()))?;
        if output.timed_out {
            return Err(Error::generation(
                format!("timed out after {:?}", request.timeout),
                output.stderr,
            ));
        }
        if !output.success() {
            return Err(Error::generation(
                format!("exited with status {:?}", output.exit_code),
                output.stderr,
            ));
        }
        Ok(output)
    }

    /// Rename `from` to `<workspace_root>/<commit_hash>`.
    ///
    /// Fails with [`Error::Conflict`] if that directory already exists; the
    /// existing directory is left as is.
    fn promote_directory(&self, from: &Path, commit_hash: &str) -> Result<PathBuf> {
        let dest = self.workspace_root.join(commit_hash);
        if dest.exists() {
            return Err(Error::Conflict(format!(
                "workspace {} already exists",
                dest.display()
            )));
        }
        fs::rename(from, &dest).map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty => {
                Error::Conflict(format!("workspace {} already exists", dest.display()))
            }
            _ => Error::Internal(
                anyhow::Error::new(err)
                    .context(format!("rename {} -> {}", from.display(), dest.display())),
            ),
        })?;
        sync_dir(&self.workspace_root);
        info!(from = %from.display(), to = %dest.display(), "workspace promoted");
        Ok(dest)
    }
}

/// Write `data` to the staging slot (token-checked) and promote it to active.
fn record_round(store: &StateStore, data: Map<String, Value>) -> Result<()> {
    let staging = store.read(Slot::Staging)?;
    let token = store.write(Slot::Staging, data, Some(&staging.token))?;
    store.promote(&token)?;
    Ok(())
}

/// Remove a half-built bootstrap or staging directory. Best effort.
fn discard(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "discarded directory"),
        Err(err) => warn!(path = %path.display(), err = %err, "failed to discard directory"),
    }
}

/// True if `path` is a directory with at least one entry.
fn is_non_empty_dir(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let mut entries =
        fs::read_dir(path).with_context(|| format!("read directory {}", path.display()))?;
    Ok(entries.next().is_some())
}
