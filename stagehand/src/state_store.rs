//! Per-workspace state slots with optimistic concurrency control.
//!
//! Each slot (`active`, `staging`) is a JSON file holding a [`StateDocument`].
//! Every write issues a fresh token; a write that names an expected token
//! only lands if it still matches the slot's current token. The
//! check-and-set runs under an in-process mutex plus a cross-process lock
//! marker file, so concurrent writers observe a total order per workspace.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Slot, StateDocument, new_token};
use crate::error::{Error, Result};
use crate::io::atomic::{write_atomic, write_json_atomic};
use crate::io::layout::AgentDirectories;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Typed access to one workspace's state slots.
#[derive(Debug)]
pub struct StateStore {
    dirs: AgentDirectories,
    lock_timeout: Duration,
    local: Mutex<()>,
}

impl StateStore {
    pub fn new(dirs: AgentDirectories, lock_timeout: Duration) -> Self {
        Self {
            dirs,
            lock_timeout,
            local: Mutex::new(()),
        }
    }

    pub fn dirs(&self) -> &AgentDirectories {
        &self.dirs
    }

    /// Create the state directory, its `.gitignore`, and both slots.
    #[instrument(skip_all, fields(root = %self.dirs.root.display()))]
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.dirs.state_dir)
            .with_context(|| format!("create directory {}", self.dirs.state_dir.display()))?;
        let ignore = state_gitignore(&self.dirs);
        let current = fs::read_to_string(&self.dirs.state_gitignore).unwrap_or_default();
        if current != ignore {
            write_atomic(&self.dirs.state_gitignore, &ignore)?;
        }
        self.with_lock(|| {
            self.load_or_init(Slot::Active)?;
            self.load_or_init(Slot::Staging)?;
            Ok(())
        })
    }

    /// Current document for `slot`, materializing an empty one if absent.
    pub fn read(&self, slot: Slot) -> Result<StateDocument> {
        self.with_lock(|| self.load_or_init(slot))
    }

    /// Replace `slot`'s payload and return the new token.
    ///
    /// With `expected_token`, fails with [`Error::StaleToken`] (leaving the slot
    /// untouched) unless it equals the slot's current token.
    #[instrument(skip_all, fields(slot = %slot))]
    pub fn write(
        &self,
        slot: Slot,
        data: Map<String, Value>,
        expected_token: Option<&str>,
    ) -> Result<String> {
        self.with_lock(|| {
            let current = self.load_or_init(slot)?;
            if let Some(expected) = expected_token {
                check_token(slot, expected, &current)?;
            }
            self.store(slot, data)
        })
    }

    /// Copy staging's payload into active once `expected_staging_token` is validated.
    ///
    /// Active is overwritten unconditionally; staging is left as is.
    #[instrument(skip_all)]
    pub fn promote(&self, expected_staging_token: &str) -> Result<String> {
        self.with_lock(|| {
            let staging = self.load_or_init(Slot::Staging)?;
            check_token(Slot::Staging, expected_staging_token, &staging)?;
            let token = self.store(Slot::Active, staging.data)?;
            info!(active_token = %token, "staging promoted to active");
            Ok(token)
        })
    }

    fn path(&self, slot: Slot) -> &Path {
        match slot {
            Slot::Active => &self.dirs.active_state_file,
            Slot::Staging => &self.dirs.staging_state_file,
        }
    }

    fn store(&self, slot: Slot, data: Map<String, Value>) -> Result<String> {
        let doc = StateDocument::new(data);
        write_json_atomic(self.path(slot), &doc)?;
        debug!(slot = %slot, token = %doc.token, "slot written");
        Ok(doc.token)
    }

    /// Load a slot, repairing a missing file, token or non-object payload.
    fn load_or_init(&self, slot: Slot) -> Result<StateDocument> {
        let path = self.path(slot);
        if !path.exists() {
            let doc = StateDocument::empty();
            write_json_atomic(path, &doc)?;
            debug!(slot = %slot, "slot initialized");
            return Ok(doc);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read state {}", path.display()))?;
        let raw: RawDocument = serde_json::from_str(&contents)
            .with_context(|| format!("parse state {}", path.display()))?;
        match raw {
            RawDocument {
                token: Some(token),
                data: Some(Value::Object(data)),
            } => Ok(StateDocument { token, data }),
            RawDocument { token, data } => {
                let doc = StateDocument {
                    token: token.unwrap_or_else(new_token),
                    data: match data {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    },
                };
                warn!(slot = %slot, "repairing malformed state document");
                write_json_atomic(path, &doc)?;
                Ok(doc)
            }
        }
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _local = self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _marker = LockMarker::acquire(&self.dirs.lock_file, self.lock_timeout)?;
        f()
    }
}

#[derive(Deserialize)]
struct RawDocument {
    token: Option<String>,
    data: Option<Value>,
}

fn check_token(slot: Slot, expected: &str, current: &StateDocument) -> Result<()> {
    if current.token == expected {
        return Ok(());
    }
    debug!(slot = %slot, expected, current = %current.token, "stale token");
    Err(Error::StaleToken {
        slot,
        expected: expected.to_string(),
        current: current.token.clone(),
    })
}

/// Lines of `state/.gitignore`: the lock marker and metadata never get committed.
fn state_gitignore(dirs: &AgentDirectories) -> String {
    let name = |path: &Path| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    format!(
        "{}\n{}\n*.tmp\n",
        name(&dirs.lock_file),
        name(&dirs.metadata_file)
    )
}

/// Exclusive lock marker file, removed on drop.
#[derive(Debug)]
struct LockMarker {
    path: PathBuf,
}

impl LockMarker {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Holder pid is informational only.
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(Error::Internal(anyhow!(
                            "timed out after {:?} waiting for state lock {}",
                            timeout,
                            path.display()
                        )));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(Error::Internal(
                        anyhow::Error::new(err)
                            .context(format!("create state lock {}", path.display())),
                    ));
                }
            }
        }
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %err, "failed to release state lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::io::config::LayoutConfig;

    fn store(root: &Path) -> StateStore {
        let store = StateStore::new(
            AgentDirectories::new(root, &LayoutConfig::default()),
            Duration::from_secs(5),
        );
        store.ensure_layout().expect("layout");
        store
    }

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn read_materializes_empty_slot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(
            AgentDirectories::new(temp.path(), &LayoutConfig::default()),
            Duration::from_secs(5),
        );
        let doc = store.read(Slot::Staging).expect("read");
        assert!(doc.data.is_empty());
        assert_eq!(store.read(Slot::Staging).expect("reread").token, doc.token);
        assert!(store.dirs().staging_state_file.exists());
        assert!(!store.dirs().lock_file.exists());
    }

    #[test]
    fn chained_writes_return_latest_payload_and_unique_tokens() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let mut seen = HashSet::new();
        let mut token = store.read(Slot::Active).expect("read").token;
        seen.insert(token.clone());
        for n in 0..5 {
            token = store
                .write(Slot::Active, payload(json!({ "n": n })), Some(&token))
                .expect("write");
            assert!(seen.insert(token.clone()), "token repeated");
            let doc = store.read(Slot::Active).expect("read");
            assert_eq!(doc.token, token);
            assert_eq!(doc.data["n"], n);
        }
    }

    #[test]
    fn stale_token_is_rejected_without_mutation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let original = store.read(Slot::Staging).expect("read");
        store
            .write(Slot::Staging, payload(json!({ "v": 1 })), Some(&original.token))
            .expect("first write");
        let before = store.read(Slot::Staging).expect("read");

        let err = store
            .write(Slot::Staging, payload(json!({ "v": 2 })), Some(&original.token))
            .unwrap_err();
        assert!(matches!(err, Error::StaleToken { slot: Slot::Staging, .. }));
        assert_eq!(store.read(Slot::Staging).expect("read"), before);
    }

    #[test]
    fn unconditional_write_ignores_current_token() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        store
            .write(Slot::Active, payload(json!({ "a": true })), None)
            .expect("write");
        assert_eq!(store.read(Slot::Active).expect("read").data["a"], true);
    }

    #[test]
    fn promote_copies_staging_and_leaves_it_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let staging = store.read(Slot::Staging).expect("read");
        let token = store
            .write(Slot::Staging, payload(json!({ "value": 42 })), Some(&staging.token))
            .expect("write");

        let active_token = store.promote(&token).expect("promote");
        let active = store.read(Slot::Active).expect("active");
        assert_eq!(active.token, active_token);
        assert_eq!(active.data["value"], 42);

        let staging_after = store.read(Slot::Staging).expect("staging");
        assert_eq!(staging_after.token, token);
        assert_eq!(staging_after.data["value"], 42);
    }

    #[test]
    fn promote_with_stale_token_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let active_before = store.read(Slot::Active).expect("active");
        let err = store.promote("not-a-token").unwrap_err();
        assert!(matches!(err, Error::StaleToken { .. }));
        assert_eq!(store.read(Slot::Active).expect("active"), active_before);
    }

    #[test]
    fn concurrent_writers_with_same_token_have_one_winner() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(store(temp.path()));
        let token = store.read(Slot::Staging).expect("read").token;

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                let token = token.clone();
                thread::spawn(move || {
                    store.write(Slot::Staging, payload(json!({ "writer": n })), Some(&token))
                })
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, Error::StaleToken { .. }))
        );
    }

    #[test]
    fn separate_store_instances_share_the_lock_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = store(temp.path());
        let second = store(temp.path());
        let token = first.read(Slot::Active).expect("read").token;
        first
            .write(Slot::Active, payload(json!({ "from": "first" })), Some(&token))
            .expect("first");
        let err = second
            .write(Slot::Active, payload(json!({ "from": "second" })), Some(&token))
            .unwrap_err();
        assert!(matches!(err, Error::StaleToken { .. }));
    }

    #[test]
    fn malformed_payload_is_repaired() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        fs::write(&store.dirs().active_state_file, r#"{"data": [1, 2]}"#).expect("write");
        let doc = store.read(Slot::Active).expect("read");
        assert!(doc.data.is_empty());
        assert_eq!(store.read(Slot::Active).expect("reread").token, doc.token);
    }

    #[test]
    fn gitignore_excludes_lock_and_metadata() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let ignore = fs::read_to_string(&store.dirs().state_gitignore).expect("read");
        assert!(ignore.lines().any(|l| l == "state.lock"));
        assert!(ignore.lines().any(|l| l == "metadata.json"));
    }
}
