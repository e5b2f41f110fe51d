//! In-memory filesystem adapter
//!
//! [`MemoryFileSystem`] implements [`IFileSystem`] over a concurrent map of
//! absolute paths. It is used by tests and supports fault injection:
//! failing listings, reads, writes and removals, read errors after a byte
//! offset, and per-read latency.

use std::collections::HashSet;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use mirrorsync_core::domain::ContentHash;
use mirrorsync_core::ports::{
    DirEntry, EntryKind, FileSystemState, IFileSystem, ReadStream, WriteStream,
};

use crate::filesystem::hash_bytes;

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        modified: DateTime<Utc>,
    },
    Directory,
    Symlink,
}

/// A read failure that fires after `after_bytes` bytes, `times` times
#[derive(Debug, Clone, Copy)]
struct ReadFault {
    after_bytes: u64,
    kind: ErrorKind,
    times: u32,
}

#[derive(Debug, Default)]
struct Faults {
    list: HashSet<PathBuf>,
    open: HashSet<PathBuf>,
    write: HashSet<PathBuf>,
    remove: HashSet<PathBuf>,
    mid_read: std::collections::HashMap<PathBuf, ReadFault>,
    read_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: DashMap<PathBuf, Node>,
    faults: Mutex<Faults>,
}

fn io_error(kind: ErrorKind, path: &Path, what: &str) -> anyhow::Error {
    anyhow::Error::from(io::Error::new(kind, format!("{what}: {}", path.display())))
}

/// In-memory [`IFileSystem`] with fault injection
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    inner: Arc<Inner>,
}

impl MemoryFileSystem {
    /// Creates an empty filesystem containing only `/`
    pub fn new() -> Self {
        let fs = Self::default();
        fs.inner.nodes.insert(PathBuf::from("/"), Node::Directory);
        fs
    }

    // --- Fixture helpers ---

    /// Creates or replaces a file, creating parent directories
    pub fn write_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        self.write_file_at(path, data, Utc::now());
    }

    /// Creates or replaces a file with an explicit modification time
    pub fn write_file_at(
        &self,
        path: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        modified: DateTime<Utc>,
    ) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.mkdirs(parent);
        }
        self.inner.nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: data.into(),
                modified,
            },
        );
    }

    /// Creates a symlink entry (its target is irrelevant; it is never followed)
    pub fn add_symlink(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.mkdirs(parent);
        }
        self.inner.nodes.insert(path.to_path_buf(), Node::Symlink);
    }

    /// Creates a directory and its parents
    pub fn create_dir(&self, path: impl AsRef<Path>) {
        self.mkdirs(path.as_ref());
    }

    /// Returns a file's content
    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.inner.nodes.get(path.as_ref()).as_deref() {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Returns true if anything exists at `path`
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.inner.nodes.contains_key(path.as_ref())
    }

    /// Removes a file or a whole subtree
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.inner.nodes.retain(|p, _| !p.starts_with(path));
    }

    /// Every regular file under `root`, as paths relative to it
    pub fn files_under(&self, root: impl AsRef<Path>) -> Vec<PathBuf> {
        let root = root.as_ref();
        let mut files: Vec<PathBuf> = self
            .inner
            .nodes
            .iter()
            .filter(|e| matches!(e.value(), Node::File { .. }))
            .filter_map(|e| e.key().strip_prefix(root).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        files
    }

    // --- Fault injection ---

    /// Makes `read_dir` on `path` fail with permission denied
    pub fn fail_list(&self, path: impl AsRef<Path>) {
        self.faults().list.insert(path.as_ref().to_path_buf());
    }

    /// Makes `open_read` and `compute_hash` on `path` fail with permission denied
    pub fn fail_open(&self, path: impl AsRef<Path>) {
        self.faults().open.insert(path.as_ref().to_path_buf());
    }

    /// Makes `open_write` fail for any path under `path`
    pub fn fail_writes_under(&self, path: impl AsRef<Path>) {
        self.faults().write.insert(path.as_ref().to_path_buf());
    }

    /// Makes `remove_file` on `path` fail with permission denied
    pub fn fail_remove(&self, path: impl AsRef<Path>) {
        self.faults().remove.insert(path.as_ref().to_path_buf());
    }

    /// Makes the next `times` streamed reads of `path` fail with `kind`
    /// once `after_bytes` bytes have been delivered
    pub fn fail_read_at(&self, path: impl AsRef<Path>, after_bytes: u64, kind: ErrorKind, times: u32) {
        self.faults().mid_read.insert(
            path.as_ref().to_path_buf(),
            ReadFault {
                after_bytes,
                kind,
                times,
            },
        );
    }

    /// Delays every streamed read call by `delay`
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.faults().read_delay = delay;
    }

    /// Removes every injected fault
    pub fn clear_faults(&self) {
        *self.faults() = Faults::default();
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        // a poisoned fault table only means a test panicked mid-update
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mkdirs(&self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            self.inner
                .nodes
                .entry(ancestor.to_path_buf())
                .or_insert(Node::Directory);
        }
    }

    fn take_mid_read_fault(&self, path: &Path) -> Option<ReadFault> {
        let mut faults = self.faults();
        let fault = faults.mid_read.get_mut(path)?;
        if fault.times == 0 {
            return None;
        }
        fault.times -= 1;
        Some(*fault)
    }

    fn parent_is_dir(&self, path: &Path) -> bool {
        path.parent()
            .map(|p| matches!(self.inner.nodes.get(p).as_deref(), Some(Node::Directory)))
            .unwrap_or(false)
    }
}

// ============================================================================
// Streams
// ============================================================================

struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
    fault: Option<ReadFault>,
    delay: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if let Some(delay) = this.delay {
            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
            if sleep.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            this.sleep = None;
        }

        let mut end = this.data.len();
        if let Some(fault) = this.fault {
            let limit = fault.after_bytes as usize;
            if this.pos >= limit {
                return Poll::Ready(Err(io::Error::new(fault.kind, "injected read fault")));
            }
            end = end.min(limit);
        }

        let n = buf.remaining().min(end - this.pos);
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

struct MemoryWriter {
    inner: Arc<Inner>,
    path: PathBuf,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner.nodes.get_mut(&self.path).as_deref_mut() {
            Some(Node::File { data, modified }) => {
                data.extend_from_slice(buf);
                *modified = Utc::now();
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(
                ErrorKind::NotFound,
                "file removed while open",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// IFileSystem implementation
// ============================================================================

#[async_trait::async_trait]
impl IFileSystem for MemoryFileSystem {
    async fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>> {
        if self.faults().list.contains(path) {
            return Err(io_error(ErrorKind::PermissionDenied, path, "listing"));
        }
        match self.inner.nodes.get(path).as_deref() {
            Some(Node::Directory) => {}
            Some(_) => return Err(io_error(ErrorKind::Other, path, "not a directory")),
            None => return Err(io_error(ErrorKind::NotFound, path, "listing")),
        }

        let mut entries: Vec<DirEntry> = self
            .inner
            .nodes
            .iter()
            .filter(|e| e.key().parent() == Some(path) && e.key().as_path() != path)
            .map(|e| DirEntry {
                name: e
                    .key()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: e.key().clone(),
                kind: match e.value() {
                    Node::File { .. } => EntryKind::File,
                    Node::Directory => EntryKind::Directory,
                    Node::Symlink => EntryKind::Symlink,
                },
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        Ok(match self.inner.nodes.get(path).as_deref() {
            None => FileSystemState::not_found(),
            Some(Node::File { data, modified }) => FileSystemState {
                exists: true,
                kind: Some(EntryKind::File),
                size: data.len() as u64,
                modified: Some(*modified),
            },
            Some(Node::Directory) => FileSystemState {
                exists: true,
                kind: Some(EntryKind::Directory),
                size: 0,
                modified: None,
            },
            Some(Node::Symlink) => FileSystemState {
                exists: true,
                kind: Some(EntryKind::Symlink),
                size: 0,
                modified: None,
            },
        })
    }

    async fn open_read(&self, path: &Path) -> anyhow::Result<ReadStream> {
        if self.faults().open.contains(path) {
            return Err(io_error(ErrorKind::PermissionDenied, path, "opening"));
        }
        let data = self
            .read_file(path)
            .ok_or_else(|| io_error(ErrorKind::NotFound, path, "opening"))?;
        let fault = self.take_mid_read_fault(path);
        let delay = self.faults().read_delay;
        Ok(Box::new(MemoryReader {
            data,
            pos: 0,
            fault,
            delay,
            sleep: None,
        }))
    }

    async fn open_write(&self, path: &Path) -> anyhow::Result<WriteStream> {
        if self.faults().write.iter().any(|p| path.starts_with(p)) {
            return Err(io_error(ErrorKind::PermissionDenied, path, "opening for write"));
        }
        if !self.parent_is_dir(path) {
            return Err(io_error(ErrorKind::NotFound, path, "parent directory missing"));
        }
        self.inner.nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: Vec::new(),
                modified: Utc::now(),
            },
        );
        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            path: path.to_path_buf(),
        }))
    }

    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        let (_, node) = self
            .inner
            .nodes
            .remove(from)
            .ok_or_else(|| io_error(ErrorKind::NotFound, from, "renaming"))?;
        self.inner.nodes.insert(to.to_path_buf(), node);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> anyhow::Result<()> {
        if self.faults().remove.contains(path) {
            return Err(io_error(ErrorKind::PermissionDenied, path, "removing"));
        }
        if matches!(self.inner.nodes.get(path).as_deref(), Some(Node::Directory)) {
            return Err(io_error(ErrorKind::Other, path, "is a directory"));
        }
        self.inner.nodes.remove(path);
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(existing) = self.inner.nodes.get(path).as_deref() {
            if !matches!(existing, Node::Directory) {
                return Err(io_error(ErrorKind::AlreadyExists, path, "not a directory"));
            }
        }
        self.mkdirs(path);
        Ok(())
    }

    async fn compute_hash(&self, path: &Path) -> anyhow::Result<ContentHash> {
        if self.faults().open.contains(path) {
            return Err(io_error(ErrorKind::PermissionDenied, path, "hashing"));
        }
        let data = self
            .read_file(path)
            .ok_or_else(|| io_error(ErrorKind::NotFound, path, "hashing"))?;
        Ok(hash_bytes(&data))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_write_and_list() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/b.txt", "B");
        fs.write_file("/src/a.txt", "A");
        fs.write_file("/src/sub/c.txt", "C");

        let entries = fs.read_dir(Path::new("/src")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert_eq!(entries[2].kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let fs = MemoryFileSystem::new();
        fs.create_dir("/d");
        let mut w = fs.open_write(Path::new("/d/x")).await.unwrap();
        w.write_all(b"hello ").await.unwrap();
        w.write_all(b"world").await.unwrap();
        w.shutdown().await.unwrap();

        let mut r = fs.open_read(Path::new("/d/x")).await.unwrap();
        let mut out = String::new();
        r.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_open_write_needs_parent() {
        let fs = MemoryFileSystem::new();
        assert!(fs.open_write(Path::new("/missing/x")).await.is_err());
    }

    #[tokio::test]
    async fn test_hash_matches_local_adapter() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/f", "");
        let hash = fs.compute_hash(Path::new("/f")).await.unwrap();
        assert_eq!(hash.as_str(), ContentHash::EMPTY);
    }

    #[tokio::test]
    async fn test_mid_read_fault_fires_limited_times() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/f", vec![7u8; 10]);
        fs.fail_read_at("/f", 4, ErrorKind::Interrupted, 1);

        let mut r = fs.open_read(Path::new("/f")).await.unwrap();
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(out.len(), 4);

        let mut r = fs.open_read(Path::new("/f")).await.unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 10);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/d/f", "x");
        fs.fail_list("/d");
        fs.fail_open("/d/f");
        fs.fail_remove("/d/f");

        assert!(fs.read_dir(Path::new("/d")).await.is_err());
        assert!(fs.open_read(Path::new("/d/f")).await.is_err());
        assert!(fs.compute_hash(Path::new("/d/f")).await.is_err());
        assert!(fs.remove_file(Path::new("/d/f")).await.is_err());

        fs.clear_faults();
        assert!(fs.read_dir(Path::new("/d")).await.is_ok());
        fs.remove_file(Path::new("/d/f")).await.unwrap();
        assert!(!fs.exists("/d/f"));
    }

    #[tokio::test]
    async fn test_rename_and_remove() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/d/.x.partial", "new");
        fs.write_file("/d/x", "old");
        fs.rename(Path::new("/d/.x.partial"), Path::new("/d/x"))
            .await
            .unwrap();
        assert_eq!(fs.read_file("/d/x").unwrap(), b"new");
        assert!(!fs.exists("/d/.x.partial"));

        fs.remove_file(Path::new("/d/x")).await.unwrap();
        fs.remove_file(Path::new("/d/x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_symlink_entry() {
        let fs = MemoryFileSystem::new();
        fs.add_symlink("/src/link");
        let state = fs.stat(Path::new("/src/link")).await.unwrap();
        assert_eq!(state.kind, Some(EntryKind::Symlink));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_delay() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/f", "abc");
        fs.set_read_delay(Some(Duration::from_secs(1)));

        let start = tokio::time::Instant::now();
        let mut r = fs.open_read(Path::new("/f")).await.unwrap();
        let mut buf = [0u8; 8];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
