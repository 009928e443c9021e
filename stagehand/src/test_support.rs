//! Test-only collaborators and scratch workspaces.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::architect::Architect;
use crate::io::config::AgentSettings;
use crate::io::generator::{GenerationOutput, GenerationRequest, Generator};
use crate::registry::VersionRegistry;

/// One scripted generator step.
#[derive(Debug, Clone)]
pub enum ScriptedGeneration {
    /// Write `(relative path, contents)` pairs, then exit 0.
    Write(Vec<(String, String)>),
    /// Touch nothing, exit 0.
    Noop,
    /// Exit with the given code and stderr.
    Fail(i32, String),
    /// Report a timeout.
    TimeOut,
    /// The tool could not be spawned.
    Unavailable,
    /// Sleep, then write the files and exit 0.
    Slow(Duration, Vec<(String, String)>),
}

impl ScriptedGeneration {
    pub fn write(path: &str, contents: &str) -> Self {
        Self::Write(vec![(path.to_string(), contents.to_string())])
    }
}

/// Generator that replays a queue of [`ScriptedGeneration`] steps.
///
/// An exhausted queue yields [`ScriptedGeneration::Noop`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<ScriptedGeneration>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<ScriptedGeneration>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, oldest first.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Generator for ScriptedGenerator {
    fn run(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(ScriptedGeneration::Noop);
        match step {
            ScriptedGeneration::Write(files) => {
                write_files(&request.workdir, &files)?;
                Ok(GenerationOutput::succeeded())
            }
            ScriptedGeneration::Noop => Ok(GenerationOutput::succeeded()),
            ScriptedGeneration::Fail(code, stderr) => Ok(GenerationOutput::failed(code, stderr)),
            ScriptedGeneration::TimeOut => Ok(GenerationOutput {
                exit_code: None,
                timed_out: true,
                ..GenerationOutput::default()
            }),
            ScriptedGeneration::Unavailable => Err(anyhow!("scripted generator unavailable")),
            ScriptedGeneration::Slow(delay, files) => {
                thread::sleep(delay);
                write_files(&request.workdir, &files)?;
                Ok(GenerationOutput::succeeded())
            }
        }
    }
}

fn write_files(root: &Path, files: &[(String, String)]) -> Result<()> {
    for (relative, contents) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
    }
    Ok(())
}

/// Scratch workspace root plus an [`Architect`] wired to a scripted generator.
pub struct TestWorkspace {
    _temp: TempDir,
    pub settings: AgentSettings,
    pub registry: Arc<VersionRegistry>,
    pub generator: Arc<ScriptedGenerator>,
    pub architect: Arc<Architect>,
}

impl TestWorkspace {
    pub fn new(steps: Vec<ScriptedGeneration>) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let settings = test_settings(temp.path());
        let registry = Arc::new(VersionRegistry::open(settings.registry_path())?);
        let generator = Arc::new(ScriptedGenerator::new(steps));
        let architect = Arc::new(Architect::new(
            settings.clone(),
            Arc::clone(&registry),
            generator.clone(),
        )?);
        Ok(Self {
            _temp: temp,
            settings,
            registry,
            generator,
            architect,
        })
    }

    pub fn root(&self) -> &Path {
        self.architect.workspace_root()
    }

    /// Entries of the workspace root other than the registry file, sorted.
    pub fn workspace_dirs(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.root())
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().is_dir())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }
}

/// Settings rooted at `root/agents` with a fast lock timeout.
pub fn test_settings(root: &Path) -> AgentSettings {
    let mut settings = AgentSettings {
        workspace_root: root.join("agents"),
        registry_file: Some(root.join("registry.json")),
        state_lock_timeout_ms: 2_000,
        ..AgentSettings::default()
    };
    settings.git.author_name = "stagehand-test".to_string();
    settings.git.author_email = "test@localhost".to_string();
    settings
}
