//! Semantic version parsing and bumping (`MAJOR.MINOR.PATCH`).

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Supported semantic version bumps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBump {
    #[default]
    Patch,
    Minor,
    Major,
}

/// Parsed `MAJOR.MINOR.PATCH` triple.
///
/// Pre-release and build suffixes are dropped on bump, matching the usual
/// semver rule that bumping a release component yields a plain release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    /// Apply `bump`; fails if the bumped component would overflow.
    pub fn bump(self, bump: VersionBump) -> Result<Self> {
        let next = |n: u64| {
            n.checked_add(1)
                .ok_or_else(|| anyhow!("version component overflow in {self}"))
        };
        Ok(match bump {
            VersionBump::Major => Self {
                major: next(self.major)?,
                minor: 0,
                patch: 0,
            },
            VersionBump::Minor => Self {
                major: self.major,
                minor: next(self.minor)?,
                patch: 0,
            },
            VersionBump::Patch => Self {
                patch: next(self.patch)?,
                ..self
            },
        })
    }
}

impl FromStr for SemVer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let core = s
            .trim()
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow!("invalid semantic version '{s}'"));
        }
        let parse = |part: &str| {
            if part.len() > 1 && part.starts_with('0') {
                return Err(anyhow!("invalid semantic version '{s}' (leading zero)"));
            }
            part.parse::<u64>()
                .map_err(|_| anyhow!("invalid semantic version '{s}'"))
        };
        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Return `version` bumped by `bump`.
pub fn bump_version(version: &str, bump: VersionBump) -> Result<String> {
    let parsed: SemVer = version.parse()?;
    Ok(parsed.bump(bump)?.to_string())
}
