//! Durable registry of versions and the service endpoints registered for them.
//!
//! The whole registry lives in one JSON file (`{"records": [...]}`). Every
//! mutation runs under a single mutex: the change is applied to a copy of the
//! map, the full file is rewritten atomically, and only then does the copy
//! replace the in-memory map. A failed write therefore leaves memory and disk
//! agreeing on the previous state.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::types::{ComponentKind, ServiceEndpoint, VersionRecord};
use crate::error::{Error, Result};
use crate::io::atomic::write_json_atomic;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    records: Vec<VersionRecord>,
}

/// Thread-safe registry persisted to a JSON file.
#[derive(Debug)]
pub struct VersionRegistry {
    path: PathBuf,
    records: Mutex<HashMap<String, VersionRecord>>,
}

impl VersionRegistry {
    /// Open the registry at `path`, creating an empty file if missing.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read registry {}", path.display()))?;
            let file: RegistryFile = serde_json::from_str(&contents)
                .with_context(|| format!("parse registry {}", path.display()))?;
            file.records
                .into_iter()
                .map(|record| (record.commit_hash.clone(), record))
                .collect()
        } else {
            write_json_atomic(&path, &RegistryFile::default())?;
            HashMap::new()
        };
        debug!(records = records.len(), "registry loaded");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the record for `commit_hash` or update its version.
    #[instrument(skip(self))]
    pub fn upsert(&self, commit_hash: &str, version: &str) -> Result<VersionRecord> {
        let record = self.mutate(|records| {
            let record = records
                .entry(commit_hash.to_string())
                .or_insert_with(|| VersionRecord::new(commit_hash, version));
            record.version = version.to_string();
            record.updated_at = Utc::now();
            Ok(record.clone())
        })?;
        info!(commit = %commit_hash, version = %version, "version upserted");
        Ok(record)
    }

    /// Register (or replace) the `kind` endpoint for `commit_hash`.
    ///
    /// `kind` is the raw component name; unknown names fail with
    /// [`Error::UnknownComponent`] before anything is written.
    #[instrument(skip(self))]
    pub fn register_service(
        &self,
        commit_hash: &str,
        version: &str,
        kind: &str,
        base_url: &str,
    ) -> Result<VersionRecord> {
        let kind: ComponentKind = kind.parse()?;
        let record = self.mutate(|records| {
            let record = records
                .entry(commit_hash.to_string())
                .or_insert_with(|| VersionRecord::new(commit_hash, version));
            record
                .endpoints
                .insert(kind, ServiceEndpoint::new(kind, base_url));
            record.updated_at = Utc::now();
            Ok(record.clone())
        })?;
        info!(commit = %commit_hash, version = %version, kind = %kind, base_url, "service registered");
        Ok(record)
    }

    /// Refresh the heartbeat of an already registered endpoint.
    pub fn heartbeat(&self, commit_hash: &str, kind: &str) -> Result<ServiceEndpoint> {
        let kind: ComponentKind = kind.parse()?;
        self.mutate(|records| {
            let endpoint = records
                .get_mut(commit_hash)
                .ok_or_else(|| Error::NotFound(format!("commit {commit_hash}")))?
                .endpoints
                .get_mut(&kind)
                .ok_or_else(|| {
                    Error::NotFound(format!("{kind} endpoint for commit {commit_hash}"))
                })?;
            endpoint.last_heartbeat = Utc::now();
            Ok(endpoint.clone())
        })
    }

    /// Set the changelog link and merge `tags` into an existing record.
    pub fn annotate(
        &self,
        commit_hash: &str,
        changelog_uri: Option<&str>,
        tags: &[String],
    ) -> Result<VersionRecord> {
        self.mutate(|records| {
            let record = records
                .get_mut(commit_hash)
                .ok_or_else(|| Error::NotFound(format!("commit {commit_hash}")))?;
            if let Some(uri) = changelog_uri {
                record.changelog_uri = Some(uri.to_string());
            }
            for tag in tags {
                if !record.tags.contains(tag) {
                    record.tags.push(tag.clone());
                }
            }
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
    }

    /// Record whose version equals `version`; the most recently updated wins a tie.
    pub fn get_by_version(&self, version: &str) -> Option<VersionRecord> {
        self.lock()
            .values()
            .filter(|record| record.version == version)
            .max_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then_with(|| b.commit_hash.cmp(&a.commit_hash))
            })
            .cloned()
    }

    pub fn get_by_commit(&self, commit_hash: &str) -> Option<VersionRecord> {
        self.lock().get(commit_hash).cloned()
    }

    /// Page of records, newest `created_at` first.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<VersionRecord> {
        let mut records: Vec<VersionRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.commit_hash.cmp(&b.commit_hash))
        });
        records.into_iter().skip(offset).take(limit).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VersionRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `change` to a copy, persist it, then publish it in memory.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut HashMap<String, VersionRecord>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    fn persist(&self, records: &HashMap<String, VersionRecord>) -> Result<()> {
        let mut records: Vec<VersionRecord> = records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.commit_hash.cmp(&b.commit_hash))
        });
        write_json_atomic(&self.path, &RegistryFile { records })
            .with_context(|| format!("persist registry {}", self.path.display()))?;
        Ok(())
    }
}
