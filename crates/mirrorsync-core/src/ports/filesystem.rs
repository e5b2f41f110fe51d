//! Filesystem port (driven/secondary port)
//!
//! This module defines the interface the engine uses for every file
//! operation on both sides of a sync pair: directory enumeration,
//! metadata, streamed reads and writes, rename, removal and hashing.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//!   Adapters keep the underlying `std::io::Error` in the error chain so the
//!   engine can classify transient failures.
//! - Reads and writes are streamed through boxed tokio `AsyncRead` /
//!   `AsyncWrite` so files are never loaded whole into memory.
//! - Paths are absolute `PathBuf`s; relative-path bookkeeping stays in the
//!   engine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::newtypes::ContentHash;

/// Streamed reader returned by [`IFileSystem::open_read`]
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Streamed writer returned by [`IFileSystem::open_write`]
pub type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// Entries and metadata
// ============================================================================

/// Kind of a filesystem entry, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    Symlink,
    /// Sockets, devices, FIFOs
    Other,
}

/// One child of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name of the child
    pub name: String,
    /// Absolute path of the child
    pub path: PathBuf,
    /// Kind of the child
    pub kind: EntryKind,
}

/// Snapshot of a path's state
///
/// Captures the metadata used to size transfers and to compare versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    /// Whether anything exists at the path
    pub exists: bool,
    /// Kind of the entry (None if it doesn't exist)
    pub kind: Option<EntryKind>,
    /// Size in bytes (0 for directories or non-existent paths)
    pub size: u64,
    /// Last modification time (None if not available or path doesn't exist)
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            kind: None,
            size: 0,
            modified: None,
        }
    }

    /// Returns true if the path exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.kind == Some(EntryKind::File)
    }

    /// Returns true if the path exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && self.kind == Some(EntryKind::Directory)
    }
}

// ============================================================================
// IFileSystem trait
// ============================================================================

/// Port trait for filesystem operations
///
/// ## Implementation Notes
///
/// - `read_dir` does not follow symlinks; they are reported as
///   [`EntryKind::Symlink`].
/// - `stat` returns `FileSystemState::not_found()` for missing paths
///   instead of an error.
/// - `remove_file` on a missing path succeeds.
/// - `compute_hash` must produce the lowercase hex SHA-256 of the content.
#[async_trait::async_trait]
pub trait IFileSystem: Send + Sync {
    /// Lists the children of a directory
    async fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>>;

    /// Gets the current state of a path
    async fn stat(&self, path: &Path) -> anyhow::Result<FileSystemState>;

    /// Opens a file for streamed reading
    async fn open_read(&self, path: &Path) -> anyhow::Result<ReadStream>;

    /// Creates (or truncates) a file for streamed writing
    ///
    /// Parent directories are NOT automatically created.
    async fn open_write(&self, path: &Path) -> anyhow::Result<WriteStream>;

    /// Atomically replaces `to` with `from`
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

    /// Deletes a file
    async fn remove_file(&self, path: &Path) -> anyhow::Result<()>;

    /// Creates a directory and all parent directories as needed
    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()>;

    /// Computes the SHA-256 of a file's full content
    async fn compute_hash(&self, path: &Path) -> anyhow::Result<ContentHash>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_state() {
        let state = FileSystemState::not_found();
        assert!(!state.exists);
        assert!(!state.is_regular_file());
        assert!(!state.is_directory());
    }

    #[test]
    fn test_state_kinds() {
        let file = FileSystemState {
            exists: true,
            kind: Some(EntryKind::File),
            size: 3,
            modified: None,
        };
        assert!(file.is_regular_file());
        assert!(!file.is_directory());

        let link = FileSystemState {
            kind: Some(EntryKind::Symlink),
            ..file
        };
        assert!(!link.is_regular_file());
    }
}
