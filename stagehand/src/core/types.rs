//! Shared data model: state documents, component kinds and version records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Named state slot within a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Active,
    Staging,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Active => "active",
            Slot::Staging => "staging",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a slot: the payload plus the token of the write that produced it.
///
/// Documents are never edited in place; a new payload goes through
/// [`crate::state_store::StateStore::write`], which issues a fresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub token: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl StateDocument {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            token: new_token(),
            data,
        }
    }

    pub fn empty() -> Self {
        Self::new(Map::new())
    }
}

/// Generate a fresh, opaque OCC token.
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Logical service component that can register an endpoint for a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Runner,
    Tuner,
    Architect,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 3] = [
        ComponentKind::Runner,
        ComponentKind::Tuner,
        ComponentKind::Architect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Runner => "runner",
            ComponentKind::Tuner => "tuner",
            ComponentKind::Architect => "architect",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownComponent(s.to_string()))
    }
}

/// Network address of a running component instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub kind: ComponentKind,
    pub last_heartbeat: DateTime<Utc>,
}

impl ServiceEndpoint {
    pub fn new(kind: ComponentKind, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            kind,
            last_heartbeat: Utc::now(),
        }
    }
}

/// Registry entry for one commit-addressed workspace snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    pub commit_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub endpoints: BTreeMap<ComponentKind, ServiceEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl VersionRecord {
    pub fn new(commit_hash: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: version.into(),
            commit_hash: commit_hash.into(),
            created_at: now,
            updated_at: now,
            endpoints: BTreeMap::new(),
            changelog_uri: None,
            tags: Vec::new(),
        }
    }

    pub fn endpoint(&self, kind: ComponentKind) -> Option<&ServiceEndpoint> {
        self.endpoints.get(&kind)
    }
}
