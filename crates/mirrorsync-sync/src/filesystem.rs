//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`IFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **No symlink following**: listings and `stat` use `symlink_metadata`
//!   semantics so links are reported, never traversed.
//! - **Streaming SHA-256**: files are hashed in fixed-size reads so memory
//!   use does not grow with file size.
//! - **Idempotent removal**: removing a missing file succeeds.

use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

use mirrorsync_core::domain::ContentHash;
use mirrorsync_core::ports::{
    DirEntry, EntryKind, FileSystemState, IFileSystem, ReadStream, WriteStream,
};

/// Read size used while hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Hashing helpers
// ============================================================================

/// Computes the SHA-256 of everything `reader` yields
pub async fn hash_reader<R>(reader: &mut R) -> anyhow::Result<ContentHash>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash::from_digest(&hasher.finalize())?)
}

/// Computes the SHA-256 of an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let digest = Sha256::digest(data);
    // a SHA-256 digest is always 32 bytes
    ContentHash::from_digest(&digest).unwrap_or_else(|_| ContentHash::empty())
}

fn to_utc(time: SystemTime) -> Option<DateTime<Utc>> {
    time.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
}

fn kind_of(file_type: std::fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

// ============================================================================
// LocalFileSystemAdapter struct
// ============================================================================

/// Adapter that bridges the [`IFileSystem`] port to the real filesystem.
///
/// This is a zero-sized struct because all operations derive their context
/// from the path arguments.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

// ============================================================================
// IFileSystem implementation
// ============================================================================

#[async_trait::async_trait]
impl IFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("listing {}", path.display()))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                kind: kind_of(file_type),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(entries = entries.len(), "directory listed");
        Ok(entries)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn stat(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let kind = kind_of(metadata.file_type());
        Ok(FileSystemState {
            exists: true,
            kind: Some(kind),
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            modified: metadata.modified().ok().and_then(to_utc),
        })
    }

    async fn open_read(&self, path: &Path) -> anyhow::Result<ReadStream> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {} for read", path.display()))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &Path) -> anyhow::Result<WriteStream> {
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("opening {} for write", path.display()))?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        tokio::fs::rename(from, to)
            .await
            .with_context(|| format!("renaming {} to {}", from.display(), to.display()))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove_file(&self, path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("already absent");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::from(e).context(format!("removing {}", path.display()))),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("creating directory {}", path.display()))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn compute_hash(&self, path: &Path) -> anyhow::Result<ContentHash> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {} for hashing", path.display()))?;
        let hash = hash_reader(&mut file).await?;
        debug!(hash = %hash.short(), "hash computed");
        Ok(hash)
    }
}

// ============================================================================
// Unit tests
// ============================================================================
