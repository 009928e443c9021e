//! Feedback rounds: staging clone -> generator -> new commit-addressed snapshot.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use super::{Architect, discard, record_round};
use crate::core::version::VersionBump;
use crate::error::{Error, Result};
use crate::io::layout::{AgentDirectories, staging_path_for};
use crate::io::metadata::{VersionMetadata, load_metadata, write_metadata};

/// Result of one feedback round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// The generator left the working tree unchanged; nothing was recorded.
    Rejected,
    Committed {
        new_version: String,
        commit_hash: String,
        workspace: PathBuf,
    },
}

/// Inputs for one round, resolved before the staging clone exists.
struct Round<'a> {
    source: AgentDirectories,
    staging: PathBuf,
    base_commit: String,
    base_version: String,
    new_version: String,
    message: &'a str,
}

impl Architect {
    /// Apply `message` to the workspace currently serving `version`.
    ///
    /// Rounds against the same workspace are serialized; rounds against
    /// different workspaces run in parallel. The source directory is never
    /// modified: work happens in a staging clone that is either promoted to
    /// `<root>/<new commit>` or discarded.
    ///
    /// Fails with [`Error::Conflict`] if the bumped version is already
    /// registered to another commit; versions are never reassigned.
    #[instrument(skip(self, message))]
    pub fn apply_feedback(
        &self,
        version: &str,
        message: &str,
        bump: VersionBump,
    ) -> Result<FeedbackOutcome> {
        let source_root = self.resolve_workspace(version)?;
        let dir_name = source_root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("workspace path {} has no name", source_root.display()))?
            .to_string();

        let handle = self.locks.handle(&dir_name);
        let _guard = handle.lock();
        if !source_root.is_dir() {
            return Err(Error::NotFound(format!("workspace {dir_name}")));
        }

        let source = self.paths_for(source_root.clone());
        let base_version = self.current_version(&source, &dir_name)?;
        let mut next = VersionMetadata::new(base_version.as_str());
        let new_version = next.bump(bump)?.to_string();
        self.ensure_version_unclaimed(&new_version)?;
        let staging = staging_path_for(&source_root);
        if staging.exists() {
            warn!(path = %staging.display(), "removing leftover staging clone");
            fs::remove_dir_all(&staging)
                .with_context(|| format!("remove stale staging {}", staging.display()))?;
        }

        let round = Round {
            source,
            staging,
            base_commit: dir_name,
            base_version,
            new_version,
            message,
        };
        let result = self.run_round(&round);
        match &result {
            Ok(FeedbackOutcome::Committed {
                new_version,
                commit_hash,
                ..
            }) => info!(
                base = %round.base_commit,
                commit = %commit_hash,
                version = %new_version,
                "feedback committed"
            ),
            Ok(FeedbackOutcome::Rejected) => {
                info!(base = %round.base_commit, "feedback produced no changes, rejected");
                discard(&round.staging);
            }
            Err(err) => {
                warn!(base = %round.base_commit, err = %err, "feedback failed, discarding staging");
                discard(&round.staging);
            }
        }
        result
    }

    fn run_round(&self, round: &Round<'_>) -> Result<FeedbackOutcome> {
        let staging_git = self.git(&round.source.root).clone_to(&round.staging)?;

        self.generate(round.message, &round.staging)?;
        if staging_git.is_clean()? {
            return Ok(FeedbackOutcome::Rejected);
        }

        let new_version = round.new_version.as_str();
        let staging = round.source.rebase(&round.staging);
        let store = self.state_store(staging.clone());
        store.ensure_layout()?;
        let mut data = Map::new();
        data.insert("feedback".to_string(), Value::from(round.message));
        data.insert("base_commit".to_string(), Value::from(round.base_commit.as_str()));
        data.insert("base_version".to_string(), Value::from(round.base_version.as_str()));
        data.insert("version".to_string(), Value::from(new_version));
        record_round(&store, data)?;

        let mut metadata = VersionMetadata::new(new_version);
        write_metadata(&staging.metadata_file, &metadata)?;
        let commit_hash =
            staging_git.commit_all(&commit_message(&metadata.version, round.message))?;
        staging_git.tag(&format!("v{}", metadata.version))?;
        metadata.stamp_commit(&commit_hash);
        write_metadata(&staging.metadata_file, &metadata)?;

        self.ensure_version_unclaimed(new_version)?;
        let workspace = self.promote_directory(&round.staging, &commit_hash)?;
        self.registry.upsert(&commit_hash, &metadata.version)?;
        Ok(FeedbackOutcome::Committed {
            new_version: metadata.version,
            commit_hash,
            workspace,
        })
    }

    fn ensure_version_unclaimed(&self, version: &str) -> Result<()> {
        match self.registry.get_by_version(version) {
            Some(record) => Err(Error::Conflict(format!(
                "version {version} already registered to commit {}",
                record.commit_hash
            ))),
            None => Ok(()),
        }
    }

    /// Version held by `source`: its metadata file, else its registry record.
    fn current_version(&self, source: &AgentDirectories, dir_name: &str) -> Result<String> {
        if let Some(metadata) = load_metadata(&source.metadata_file)? {
            return Ok(metadata.version);
        }
        self.registry
            .get_by_commit(dir_name)
            .map(|record| record.version)
            .ok_or_else(|| Error::NotFound(format!("version metadata for workspace {dir_name}")))
    }
}

fn commit_message(version: &str, feedback: &str) -> String {
    let summary = feedback.lines().next().unwrap_or_default().trim();
    let summary: String = summary.chars().take(72).collect();
    format!("feedback {version}: {summary}\n\n{feedback}")
}
