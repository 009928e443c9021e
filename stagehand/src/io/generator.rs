//! Code-generation collaborator abstraction.
//!
//! The [`Generator`] trait decouples lifecycle orchestration from the actual
//! tool (currently `codex exec`). Tests use scripted generators that edit the
//! working directory directly without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for one generator invocation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Instruction text fed to the tool.
    pub instruction: String,
    /// Directory the tool may freely modify.
    pub workdir: PathBuf,
    /// Maximum time to wait for the tool to complete.
    pub timeout: Duration,
}

/// Outcome reported by the tool.
///
/// A non-zero (or missing, when killed) exit code is the only failure signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl GenerationOutput {
    pub fn succeeded() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Abstraction over code-generation backends.
///
/// Implementations block until the tool finishes; callers are expected to run
/// them off any request-accepting thread.
pub trait Generator: Send + Sync {
    /// Run the tool. `Err` means the tool could not be invoked at all.
    fn run(&self, request: &GenerationRequest) -> Result<GenerationOutput>;
}

/// Generator that spawns `codex exec` with the instruction on stdin.
#[derive(Debug, Clone)]
pub struct CodexGenerator {
    config: GeneratorConfig,
}

impl CodexGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("exec")
            .arg("--sandbox")
            .arg(&self.config.sandbox)
            .arg("--full-auto")
            // Workspaces are fresh repositories codex has never trusted.
            .arg("--skip-git-repo-check");
        if let Some(profile) = &self.config.profile {
            cmd.arg("--profile").arg(profile);
        }
        cmd.arg("-").current_dir(workdir);
        cmd
    }
}

impl Generator for CodexGenerator {
    #[instrument(skip_all, fields(workdir = %request.workdir.display(), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        info!(command = %self.config.command, "starting code generation");
        let output = run_command_with_timeout(
            self.command(&request.workdir),
            Some(request.instruction.as_bytes()),
            request.timeout,
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run {} exec", self.config.command))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "code generation timed out");
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "code generation failed");
        } else {
            debug!("code generation completed successfully");
        }
        Ok(GenerationOutput {
            exit_code: output.status.code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: output.timed_out,
        })
    }
}

/// Generator that does nothing and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedGenerator;

impl Generator for SimulatedGenerator {
    fn run(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        info!(workdir = %request.workdir.display(), "simulation mode, skipping code generation");
        Ok(GenerationOutput {
            stdout: "simulation mode enabled; generation skipped".to_string(),
            ..GenerationOutput::succeeded()
        })
    }
}

/// Build the generator selected by `config`.
pub fn generator_from_config(config: &GeneratorConfig) -> Arc<dyn Generator> {
    if config.simulate {
        Arc::new(SimulatedGenerator)
    } else {
        Arc::new(CodexGenerator::new(config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workdir: &Path) -> GenerationRequest {
        GenerationRequest {
            instruction: "do the thing".to_string(),
            workdir: workdir.to_path_buf(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn missing_executable_is_an_invocation_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = CodexGenerator::new(GeneratorConfig {
            command: "__missing_codex__".to_string(),
            ..GeneratorConfig::default()
        });
        let err = generator.run(&request(temp.path())).unwrap_err();
        assert!(format!("{err:#}").contains("__missing_codex__"));
    }

    #[test]
    fn non_zero_exit_is_reported_not_raised() {
        let temp = tempfile::tempdir().expect("tempdir");
        // `false` ignores its arguments and exits 1.
        let generator = CodexGenerator::new(GeneratorConfig {
            command: "false".to_string(),
            ..GeneratorConfig::default()
        });
        let output = generator.run(&request(temp.path())).expect("run");
        assert_eq!(output.exit_code, Some(1));
        assert!(!output.success());
    }

    #[test]
    fn simulation_is_selected_by_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = generator_from_config(&GeneratorConfig {
            simulate: true,
            ..GeneratorConfig::default()
        });
        let output = generator.run(&request(temp.path())).expect("run");
        assert!(output.success());
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }
}
