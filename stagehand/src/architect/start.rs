//! Workspace bootstrap: name-based directory -> first commit-addressed snapshot.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use super::{Architect, discard, is_non_empty_dir, record_round};
use crate::error::{Error, Result};
use crate::io::layout::{AgentDirectories, validate_segment};
use crate::io::metadata::{VersionMetadata, write_metadata};

/// Outcome of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub workspace: PathBuf,
    pub version: String,
    pub commit_hash: String,
}

impl Architect {
    /// Bootstrap the workspace `agent_name` from `description`.
    ///
    /// - Fails with [`Error::Conflict`] if `<root>/<agent_name>` is non-empty or
    ///   another bootstrap of the same name is in flight.
    /// - Runs the generator in the new directory, commits the result, and
    ///   renames the directory to `<root>/<commit>`.
    /// - Registers the commit at the configured default version.
    ///
    /// On any failure before the rename the bootstrap directory is removed.
    #[instrument(skip(self, description))]
    pub fn start(&self, agent_name: &str, description: &str) -> Result<StartOutcome> {
        validate_segment(agent_name)
            .map_err(|err| Error::InvalidInput(format!("agent name: {err}")))?;

        let handle = self.locks.handle(&format!("bootstrap/{agent_name}"));
        let Some(_guard) = handle.try_lock() else {
            return Err(Error::Conflict(format!(
                "bootstrap of {agent_name} already in progress"
            )));
        };

        let dirs = self.paths_for(self.workspace_root.join(agent_name));
        if is_non_empty_dir(&dirs.root)? {
            return Err(Error::Conflict(format!(
                "workspace {} is not empty",
                dirs.root.display()
            )));
        }
        fs::create_dir_all(&dirs.root)
            .with_context(|| format!("create workspace {}", dirs.root.display()))?;

        match self.bootstrap(&dirs, agent_name, description) {
            Ok(outcome) => {
                info!(
                    agent = agent_name,
                    commit = %outcome.commit_hash,
                    version = %outcome.version,
                    "workspace bootstrapped"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(agent = agent_name, err = %err, "bootstrap failed, discarding workspace");
                discard(&dirs.root);
                Err(err)
            }
        }
    }

    fn bootstrap(
        &self,
        dirs: &AgentDirectories,
        agent_name: &str,
        description: &str,
    ) -> Result<StartOutcome> {
        let store = self.state_store(dirs.clone());
        store.ensure_layout()?;
        let git = self.git(&dirs.root);
        git.open()?;

        self.generate(&bootstrap_instruction(description), &dirs.root)?;

        let mut round = Map::new();
        round.insert("agent_name".to_string(), Value::from(agent_name));
        round.insert("description".to_string(), Value::from(description));
        record_round(&store, round)?;

        let mut metadata = VersionMetadata::new(self.settings.default_version.clone());
        write_metadata(&dirs.metadata_file, &metadata)?;
        let commit_hash = git.commit_all(&format!("bootstrap {agent_name}"))?;
        git.tag(&format!("v{}", metadata.version))?;
        metadata.stamp_commit(&commit_hash);
        write_metadata(&dirs.metadata_file, &metadata)?;

        let workspace = self.promote_directory(&dirs.root, &commit_hash)?;
        self.registry.upsert(&commit_hash, &metadata.version)?;
        Ok(StartOutcome {
            workspace,
            version: metadata.version,
            commit_hash,
        })
    }
}

fn bootstrap_instruction(description: &str) -> String {
    format!(
        "You are the architect of this agent workspace. Bootstrap runner.py and \
         tests.py for the system described below, keeping the layout: runner.py, \
         tests.py, logs/, state/. Do not edit files under state/.\n\n\
         System description:\n{description}\n"
    )
}
