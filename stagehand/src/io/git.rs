//! Git adapter for workspace repositories.
//!
//! Workspaces are committed, tagged and cloned deterministically, so we keep a
//! small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// One entry of `git log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub hash: String,
    pub message: String,
}

/// Author/committer identity applied to commits made through [`Git`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    identity: Option<Identity>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Open the repository at `workdir`, initializing one if `.git` is missing.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn open(&self) -> Result<()> {
        if self.workdir.join(".git").exists() {
            return Ok(());
        }
        debug!("initializing repository");
        self.run_checked(&["init", "--quiet"])?;
        Ok(())
    }

    /// Return the full HEAD commit id.
    pub fn head(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if the working tree matches the last commit (untracked files count as changes).
    pub fn is_clean(&self) -> Result<bool> {
        let entries = self.status_porcelain()?;
        debug!(changed = entries.len(), "worktree status");
        Ok(entries.is_empty())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Stage everything, commit it and return the resulting commit id.
    ///
    /// With nothing to commit, returns the current HEAD unchanged.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn commit_all(&self, message: &str) -> Result<String> {
        self.add_all()?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return self.head().context("nothing to commit and no HEAD");
        }
        let mut args: Vec<String> = Vec::new();
        if let Some(identity) = &self.identity {
            args.extend([
                "-c".to_string(),
                format!("user.name={}", identity.name),
                "-c".to_string(),
                format!("user.email={}", identity.email),
            ]);
        }
        args.extend([
            "-c".to_string(),
            "commit.gpgsign=false".to_string(),
            "commit".to_string(),
            "--quiet".to_string(),
            "-m".to_string(),
            message.to_string(),
        ]);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&refs)?;
        let head = self.head()?;
        debug!(commit = %head, "committed");
        Ok(head)
    }

    /// Point tag `name` at HEAD, replacing any existing tag of that name.
    pub fn tag(&self, name: &str) -> Result<()> {
        self.run_checked(&["-c", "tag.gpgsign=false", "tag", "-f", name])?;
        Ok(())
    }

    /// Clone this repository into `destination` (which must not exist).
    #[instrument(skip_all, fields(destination = %destination.display()))]
    pub fn clone_to(&self, destination: &Path) -> Result<Git> {
        if destination.exists() {
            return Err(anyhow!("clone destination {} exists", destination.display()));
        }
        let dest = destination
            .to_str()
            .with_context(|| format!("non-utf8 clone destination {}", destination.display()))?;
        self.run_checked(&["clone", "--quiet", ".", dest])?;
        Ok(Git {
            workdir: destination.to_path_buf(),
            identity: self.identity.clone(),
        })
    }

    /// Most recent commits first.
    pub fn log(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        let count = format!("-n{limit}");
        let out = self.run_capture(&["log", &count, "--format=%H%x09%s"])?;
        Ok(out
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .map(|(hash, message)| CommitSummary {
                hash: hash.to_string(),
                message: message.trim().to_string(),
            })
            .collect())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn identity() -> Identity {
        Identity {
            name: "tester".to_string(),
            email: "tester@localhost".to_string(),
        }
    }

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn commit_clone_and_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let origin = temp.path().join("origin");
        fs::create_dir_all(&origin).expect("mkdir");
        let git = Git::new(&origin).with_identity(identity());
        git.open().expect("init");

        fs::write(origin.join("a.txt"), "a\n").expect("write");
        assert!(!git.is_clean().expect("status"));
        let first = git.commit_all("first").expect("commit");
        assert!(git.is_clean().expect("status"));
        assert_eq!(git.commit_all("noop").expect("noop commit"), first);
        git.tag("v0.0.0").expect("tag");

        let clone = git.clone_to(&temp.path().join("clone")).expect("clone");
        assert_eq!(clone.head().expect("head"), first);
        let tagged = clone.run_capture(&["rev-parse", "v0.0.0"]).expect("tag lookup");
        assert_eq!(tagged.trim(), first);
        assert!(clone.is_clean().expect("clone status"));

        fs::write(clone.workdir().join("b.txt"), "b\n").expect("write");
        let second = clone.commit_all("second").expect("commit");
        assert_ne!(second, first);
        let log = clone.log(10).expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].hash, second);
        assert_eq!(log[0].message, "second");
    }

    #[test]
    fn clone_refuses_existing_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path()).with_identity(identity());
        git.open().expect("init");
        let err = git.clone_to(temp.path()).unwrap_err();
        assert!(err.to_string().contains("exists"));
    }
}
