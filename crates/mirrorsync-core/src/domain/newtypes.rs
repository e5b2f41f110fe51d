//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// SessionId
// ============================================================================

/// Identifier for SyncSession entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a SessionId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid SessionId: {e}")))
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// RelativePath
// ============================================================================

/// A validated path relative to a sync root, always `/`-separated
///
/// RelativePath ensures the path is:
/// - Non-empty and relative (no leading `/`, no drive prefix)
/// - Free of `.` and `..` components and empty segments
///
/// It is the key of the hash index, so two platforms produce the same key
/// for the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a new RelativePath from a `/`-separated string
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is empty, absolute,
    /// or contains `.`/`..`/empty segments
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        if path.is_empty() {
            return Err(DomainError::InvalidPath("Path cannot be empty".to_string()));
        }
        if path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must be relative: {path}"
            )));
        }
        if path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(DomainError::InvalidPath(format!(
                "Path contains empty, '.' or '..' segments: {path}"
            )));
        }
        Ok(Self(path))
    }

    /// Build a RelativePath from `path` stripped of `root`
    ///
    /// # Errors
    /// Returns error if `path` is not inside `root` or has no normal components
    pub fn from_root(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let stripped = path.strip_prefix(root).map_err(|_| {
            DomainError::InvalidPath(format!(
                "{} is not within {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut segments = Vec::new();
        for component in stripped.components() {
            match component {
                Component::Normal(c) => match c.to_str() {
                    Some(segment) => segments.push(segment.to_string()),
                    None => {
                        return Err(DomainError::InvalidPath(format!(
                            "{} is not valid UTF-8",
                            stripped.display()
                        )))
                    }
                },
                other => {
                    return Err(DomainError::InvalidPath(format!(
                        "Unexpected component {other:?} in {}",
                        stripped.display()
                    )))
                }
            }
        }

        Self::new(segments.join("/"))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this path under `root`
    #[must_use]
    pub fn under(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, s| acc.join(s))
    }

    /// Returns true if this path is `prefix` itself or lies beneath it
    #[must_use]
    pub fn starts_with(&self, prefix: &RelativePath) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// SHA-256 digest of a file's full content, lowercase hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of a hex-encoded SHA-256 digest
    const HEX_LEN: usize = 64;

    /// Digest of zero bytes of input
    pub const EMPTY: &'static str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    /// Create a new ContentHash from its hex form
    ///
    /// # Errors
    /// Returns error if the string is not 64 lowercase hex characters
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }
        if !hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(DomainError::InvalidHash(format!(
                "Hash is not lowercase hex: {hash}"
            )));
        }
        Ok(Self(hash))
    }

    /// Build a ContentHash from raw 32-byte digest output
    ///
    /// # Errors
    /// Returns error if `digest` is not 32 bytes long
    pub fn from_digest(digest: &[u8]) -> Result<Self, DomainError> {
        if digest.len() * 2 != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "expected 32 digest bytes, got {}",
                digest.len()
            )));
        }
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(Self(hex))
    }

    /// The hash of empty content
    #[must_use]
    pub fn empty() -> Self {
        Self(Self::EMPTY.to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ============================================================================
// SyncPairKey
// ============================================================================

/// Identifies one source → destination pair in the hash index
///
/// The index is partitioned by pair so that sessions on different roots
/// never observe each other's paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncPairKey(String);

impl SyncPairKey {
    /// Build the key for a source/destination pair
    ///
    /// Both roots go through [`normalize_root`], so different spellings of
    /// the same directories share one key.
    #[must_use]
    pub fn new(source: &Path, destination: &Path) -> Self {
        Self(format!(
            "{} => {}",
            normalize_root(source).display(),
            normalize_root(destination).display()
        ))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lexically normalizes a sync root
///
/// Drops `.` segments and trailing separators. `..` is kept as is since it
/// cannot be resolved without following symlinks.
#[must_use]
pub fn normalize_root(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

impl Display for SyncPairKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
