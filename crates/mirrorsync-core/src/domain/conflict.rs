//! Conflict domain entities
//!
//! This module defines the types used when a path diverged on both sides
//! of a sync pair: the per-side version metadata, the strategy that picks
//! a winner, and the append-only resolution record.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, RelativePath};

/// Information about one side's version of a file
///
/// VersionInfo captures the metadata the resolver compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Content hash, when it was computed
    hash: Option<ContentHash>,
    /// File size in bytes
    size: u64,
    /// When this version was last modified
    modified_at: DateTime<Utc>,
}

impl VersionInfo {
    /// Creates a new VersionInfo without a hash
    pub fn new(size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            hash: None,
            size,
            modified_at,
        }
    }

    /// Attaches a content hash
    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Returns the content hash if known
    pub fn hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    /// Returns the file size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns when this version was modified
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }
}

/// How a winner is picked between two divergent versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Later modification time wins
    #[default]
    Newer,
    /// Greater size wins
    Larger,
    /// Source side always wins
    Local,
    /// Destination side always wins
    Remote,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictStrategy::Newer => "newer",
            ConflictStrategy::Larger => "larger",
            ConflictStrategy::Local => "local",
            ConflictStrategy::Remote => "remote",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ConflictStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newer" => Ok(ConflictStrategy::Newer),
            "larger" => Ok(ConflictStrategy::Larger),
            "local" => Ok(ConflictStrategy::Local),
            "remote" => Ok(ConflictStrategy::Remote),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown conflict strategy '{other}' (expected newer, larger, local or remote)"
            ))),
        }
    }
}

/// Which side's version was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    /// The source copy
    Local,
    /// The destination copy
    Remote,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Winner::Local => write!(f, "local"),
            Winner::Remote => write!(f, "remote"),
        }
    }
}

/// Record of one resolved conflict
///
/// Resolutions are append-only: they are created by the resolver and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    file: RelativePath,
    strategy: ConflictStrategy,
    winner: Winner,
    local_version: VersionInfo,
    remote_version: VersionInfo,
    resolved_at: DateTime<Utc>,
}

impl ConflictResolution {
    /// Creates a new ConflictResolution
    pub fn new(
        file: RelativePath,
        strategy: ConflictStrategy,
        winner: Winner,
        local_version: VersionInfo,
        remote_version: VersionInfo,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            file,
            strategy,
            winner,
            local_version,
            remote_version,
            resolved_at,
        }
    }

    pub fn file(&self) -> &RelativePath {
        &self.file
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    pub fn winner(&self) -> Winner {
        self.winner
    }

    pub fn local_version(&self) -> &VersionInfo {
        &self.local_version
    }

    pub fn remote_version(&self) -> &VersionInfo {
        &self.remote_version
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }
}
