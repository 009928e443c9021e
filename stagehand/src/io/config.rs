//! Service configuration: optional TOML file plus `STAGEHAND_*` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::version::SemVer;
use crate::io::layout::AgentDirectories;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "STAGEHAND_";

/// Global configuration shared by the lifecycle controller and the gateway.
///
/// Missing fields default to values suitable for a local single-host setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    /// Directory holding every workspace (name-based and commit-addressed).
    pub workspace_root: PathBuf,

    /// Registry file; defaults to `<workspace_root>/registry.json`.
    pub registry_file: Option<PathBuf>,

    /// Version assigned to freshly bootstrapped workspaces.
    pub default_version: String,

    /// How long a state write waits for the cross-process lock marker.
    pub state_lock_timeout_ms: u64,

    pub layout: LayoutConfig,
    pub generator: GeneratorConfig,
    pub git: GitConfig,
    pub gateway: GatewayConfig,
}

/// File names inside a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutConfig {
    pub state_dirname: String,
    pub active_state_filename: String,
    pub staging_state_filename: String,
    pub lock_filename: String,
    pub metadata_filename: String,
}

/// Code-generation collaborator invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub command: String,
    pub profile: Option<String>,
    pub sandbox: String,
    /// Skip spawning the tool entirely and report success.
    pub simulate: bool,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Commit identity used for workspace commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub author_name: String,
    pub author_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Ceiling for a single proxied upstream call.
    pub proxy_timeout_secs: u64,
    /// Largest inbound body the proxy will buffer.
    pub max_body_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("agents"),
            registry_file: None,
            default_version: "0.0.0".to_string(),
            state_lock_timeout_ms: 10_000,
            layout: LayoutConfig::default(),
            generator: GeneratorConfig::default(),
            git: GitConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            state_dirname: "state".to_string(),
            active_state_filename: "active.json".to_string(),
            staging_state_filename: "staging.json".to_string(),
            lock_filename: "state.lock".to_string(),
            metadata_filename: "metadata.json".to_string(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: "codex".to_string(),
            profile: None,
            sandbox: "danger-full-access".to_string(),
            simulate: false,
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: "stagehand".to_string(),
            author_email: "stagehand@localhost".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            proxy_timeout_secs: 300,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl AgentSettings {
    pub fn validate(&self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(anyhow!("workspace_root must not be empty"));
        }
        self.default_version
            .parse::<SemVer>()
            .context("default_version")?;
        if self.state_lock_timeout_ms == 0 {
            return Err(anyhow!("state_lock_timeout_ms must be > 0"));
        }
        let names = [
            ("layout.state_dirname", &self.layout.state_dirname),
            ("layout.active_state_filename", &self.layout.active_state_filename),
            ("layout.staging_state_filename", &self.layout.staging_state_filename),
            ("layout.lock_filename", &self.layout.lock_filename),
            ("layout.metadata_filename", &self.layout.metadata_filename),
        ];
        for (field, value) in names {
            if value.trim().is_empty() || value.contains('/') {
                return Err(anyhow!("{field} must be a non-empty file name"));
            }
        }
        if self.generator.command.trim().is_empty() {
            return Err(anyhow!("generator.command must not be empty"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.gateway.proxy_timeout_secs == 0 {
            return Err(anyhow!("gateway.proxy_timeout_secs must be > 0"));
        }
        if self.gateway.max_body_bytes == 0 {
            return Err(anyhow!("gateway.max_body_bytes must be > 0"));
        }
        Ok(())
    }

    /// Resolved registry file location.
    pub fn registry_path(&self) -> PathBuf {
        self.registry_file
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("registry.json"))
    }

    /// Directory layout for the workspace rooted at `root`.
    pub fn paths_for(&self, root: impl Into<PathBuf>) -> AgentDirectories {
        AgentDirectories::new(root, &self.layout)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generator.timeout_secs)
    }

    pub fn state_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.state_lock_timeout_ms)
    }

    /// Apply `STAGEHAND_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        if let Some(root) = var("WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(path) = var("REGISTRY_FILE") {
            self.registry_file = Some(PathBuf::from(path));
        }
        if let Some(command) = var("CODEX_COMMAND") {
            self.generator.command = command;
        }
        if let Some(profile) = var("CODEX_PROFILE") {
            self.generator.profile = Some(profile).filter(|p| !p.trim().is_empty());
        }
        if let Some(flag) = var("CODEX_SIMULATE") {
            self.generator.simulate = parse_flag(&flag);
        }
        if let Some(secs) = var("GENERATION_TIMEOUT_SECS") {
            self.generator.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PREFIX}GENERATION_TIMEOUT_SECS='{secs}'"))?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load settings from a TOML file, then apply process environment overrides.
///
/// A missing file (or `None`) yields `AgentSettings::default()` plus overrides.
pub fn load_settings(path: Option<&Path>) -> Result<AgentSettings> {
    let mut settings = match path {
        Some(path) if path.exists() => {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        }
        _ => AgentSettings::default(),
    };
    settings.apply_env_overrides(|name| std::env::var(name).ok())?;
    settings.validate()?;
    Ok(settings)
}
