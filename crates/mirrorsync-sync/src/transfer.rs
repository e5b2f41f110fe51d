//! Chunked file transfer
//!
//! Streams one file into a hidden `.<name>.mirrorsync-partial` sibling of
//! the destination and renames it into place once every chunk is written.
//! Each chunk read is raced against the session's stop signal; a stopped or
//! failed attempt removes its partial file so the destination is never
//! half-written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use mirrorsync_core::domain::{FileError, RelativePath, SyncSession};
use mirrorsync_core::ports::{IFileSystem, SyncEvent};

use crate::events::EventBus;
use crate::retry::RetryPolicy;
use crate::stop::StopSignal;
use crate::TransferError;

const PARTIAL_SUFFIX: &str = "mirrorsync-partial";

/// Temporary sibling a transfer writes into before the final rename
pub fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.{PARTIAL_SUFFIX}"))
}

/// Fills `buf` from `reader`, returning fewer bytes only at end of stream
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Streams files from source to destination in fixed-size chunks
pub struct TransferEngine {
    fs: Arc<dyn IFileSystem>,
    chunk_size: usize,
    events: EventBus,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl TransferEngine {
    /// Creates an engine allowing at most `max_inflight` concurrent transfers
    pub fn new(
        fs: Arc<dyn IFileSystem>,
        chunk_size: usize,
        max_inflight: usize,
        events: EventBus,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fs,
            chunk_size: chunk_size.max(1),
            events,
            retry,
            permits: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copies `source` to `destination`, accounting progress on `session`
    ///
    /// Returns the number of bytes written. Transient I/O errors are
    /// retried; bytes counted by a failed attempt are rewound. A final I/O
    /// failure is recorded in the session's errors before being returned.
    /// A stop is returned without touching the session's errors.
    #[instrument(skip(self, session, stop), fields(session_id = %session.id(), file = %relative))]
    pub async fn sync_file(
        &self,
        source: &Path,
        destination: &Path,
        relative: &RelativePath,
        session: &mut SyncSession,
        stop: &StopSignal,
    ) -> Result<u64, TransferError> {
        let _permit = tokio::select! {
            biased;
            reason = stop.stopped() => return Err(TransferError::Stopped(reason)),
            permit = self.permits.acquire() => permit
                .map_err(|e| TransferError::Io(anyhow::Error::from(e)))?,
        };

        let mut attempt = 0;
        loop {
            stop.check().map_err(TransferError::Stopped)?;

            let mut counted = 0u64;
            let result = self
                .attempt(source, destination, relative, session, stop, &mut counted)
                .await;

            let err = match result {
                Ok(bytes) => {
                    session.record_file_processed();
                    debug!(bytes, "File transferred");
                    return Ok(bytes);
                }
                Err(err) => err,
            };

            session.rewind_transferred(counted);
            self.discard_partial(destination).await;

            if err.is_transient() && attempt < self.retry.max_retries {
                let delay = self.retry.delay(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient transfer error, retrying"
                );
                tokio::select! {
                    biased;
                    reason = stop.stopped() => return Err(TransferError::Stopped(reason)),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
                continue;
            }

            if let TransferError::Io(e) = &err {
                warn!(error = %format!("{e:#}"), "Transfer failed");
                session.add_error(FileError::new(relative.clone(), format!("{e:#}")));
            }
            return Err(err);
        }
    }

    async fn attempt(
        &self,
        source: &Path,
        destination: &Path,
        relative: &RelativePath,
        session: &mut SyncSession,
        stop: &StopSignal,
        counted: &mut u64,
    ) -> Result<u64, TransferError> {
        let state = self
            .fs
            .stat(source)
            .await
            .with_context(|| format!("stat {}", source.display()))?;
        if !state.is_regular_file() {
            return Err(anyhow::anyhow!("{} is no longer a regular file", source.display()).into());
        }

        if let Some(parent) = destination.parent() {
            self.fs
                .create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let partial = partial_path(destination);
        let mut reader = self.fs.open_read(source).await?;
        let mut writer = self.fs.open_write(&partial).await?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut chunk_index = 0u64;
        loop {
            let n = tokio::select! {
                biased;
                reason = stop.stopped() => return Err(TransferError::Stopped(reason)),
                read = read_chunk(&mut reader, &mut buf) => {
                    read.with_context(|| format!("reading {}", source.display()))?
                }
            };
            if n == 0 {
                break;
            }

            writer
                .write_all(&buf[..n])
                .await
                .with_context(|| format!("writing {}", partial.display()))?;

            *counted += n as u64;
            session.add_transferred(n as u64);
            self.events.publish(SyncEvent::Progress {
                session_id: *session.id(),
                file: relative.clone(),
                progress: session.progress(),
                chunk_index,
            });
            chunk_index += 1;

            if n < buf.len() {
                break;
            }
        }

        writer
            .shutdown()
            .await
            .with_context(|| format!("closing {}", partial.display()))?;
        drop(writer);

        self.fs
            .rename(&partial, destination)
            .await
            .with_context(|| format!("renaming into {}", destination.display()))?;

        Ok(*counted)
    }

    async fn discard_partial(&self, destination: &Path) {
        let partial = partial_path(destination);
        if let Err(e) = self.fs.remove_file(&partial).await {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial file");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::time::Duration;

    use chrono::Utc;
    use mirrorsync_core::domain::ChangeSet;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::memory::MemoryFileSystem;
    use crate::stop::StopReason;

    fn engine(fs: &MemoryFileSystem, chunk: usize, retry: RetryPolicy) -> (TransferEngine, EventBus) {
        let events = EventBus::new(64);
        let engine = TransferEngine::new(Arc::new(fs.clone()), chunk, 2, events.clone(), retry);
        (engine, events)
    }

    fn session(total_bytes: u64) -> SyncSession {
        let mut s = SyncSession::new("/src", "/dst", Utc::now());
        s.start(Utc::now()).unwrap();
        s.set_plan(ChangeSet::default(), 1, total_bytes);
        s
    }

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/d/sub/a.txt")),
            PathBuf::from("/d/sub/.a.txt.mirrorsync-partial")
        );
    }

    #[tokio::test]
    async fn test_transfers_in_chunks_with_progress() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a.bin", vec![7u8; 10]);
        let (engine, events) = engine(&fs, 4, RetryPolicy::none());
        let mut rx = events.subscribe();
        let mut s = session(10);

        let bytes = engine
            .sync_file(
                Path::new("/src/a.bin"),
                Path::new("/dst/deep/a.bin"),
                &rel("a.bin"),
                &mut s,
                &StopSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(fs.read_file("/dst/deep/a.bin"), Some(vec![7u8; 10]));
        assert!(!fs.exists(partial_path(Path::new("/dst/deep/a.bin"))));
        assert_eq!(s.files_processed(), 1);
        assert_eq!(s.transferred_bytes(), 10);
        assert_eq!(s.progress(), 100.0);

        let mut chunks = Vec::new();
        while let Ok(SyncEvent::Progress { chunk_index, progress, .. }) = rx.try_recv() {
            chunks.push((chunk_index, progress));
        }
        assert_eq!(chunks, vec![(0, 40.0), (1, 80.0), (2, 100.0)]);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/empty", "");
        let (engine, _events) = engine(&fs, 4, RetryPolicy::none());
        let mut s = session(0);

        let bytes = engine
            .sync_file(
                Path::new("/src/empty"),
                Path::new("/dst/empty"),
                &rel("empty"),
                &mut s,
                &StopSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(bytes, 0);
        assert_eq!(fs.read_file("/dst/empty"), Some(Vec::new()));
        assert_eq!(s.files_processed(), 1);
    }

    #[tokio::test]
    async fn test_mid_read_failure_cleans_up() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a", vec![1u8; 12]);
        fs.write_file("/dst/a", "old");
        fs.fail_read_at("/src/a", 4, ErrorKind::PermissionDenied, 1);
        let (engine, _events) = engine(&fs, 4, RetryPolicy::none());
        let mut s = session(12);

        let result = engine
            .sync_file(
                Path::new("/src/a"),
                Path::new("/dst/a"),
                &rel("a"),
                &mut s,
                &StopSignal::never(),
            )
            .await;

        assert!(matches!(result, Err(TransferError::Io(_))));
        assert_eq!(fs.read_file("/dst/a"), Some(b"old".to_vec()));
        assert!(!fs.exists(partial_path(Path::new("/dst/a"))));
        assert_eq!(s.transferred_bytes(), 0);
        assert_eq!(s.files_processed(), 0);
        assert_eq!(s.errors().len(), 1);
        assert_eq!(s.errors()[0].file(), &rel("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a", vec![3u8; 8]);
        fs.fail_read_at("/src/a", 4, ErrorKind::Interrupted, 2);
        let (engine, _events) = engine(&fs, 4, RetryPolicy::default());
        let mut s = session(8);

        let bytes = engine
            .sync_file(
                Path::new("/src/a"),
                Path::new("/dst/a"),
                &rel("a"),
                &mut s,
                &StopSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(bytes, 8);
        assert_eq!(s.transferred_bytes(), 8);
        assert!(s.errors().is_empty());
        assert_eq!(fs.read_file("/dst/a"), Some(vec![3u8; 8]));
    }

    #[tokio::test]
    async fn test_write_failure_is_recorded() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a", "data");
        fs.fail_writes_under("/dst");
        let (engine, _events) = engine(&fs, 4, RetryPolicy::default());
        let mut s = session(4);

        let result = engine
            .sync_file(
                Path::new("/src/a"),
                Path::new("/dst/a"),
                &rel("a"),
                &mut s,
                &StopSignal::never(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(s.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a", "data");
        let (engine, _events) = engine(&fs, 4, RetryPolicy::none());
        let mut s = session(4);
        let token = CancellationToken::new();
        token.cancel();

        let result = engine
            .sync_file(
                Path::new("/src/a"),
                Path::new("/dst/a"),
                &rel("a"),
                &mut s,
                &StopSignal::new(token, None),
            )
            .await;
        assert!(matches!(result, Err(TransferError::Stopped(StopReason::Cancelled))));
        assert!(!fs.exists("/dst/a"));
        assert!(s.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_transfer_leaves_no_partial() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/big", vec![0u8; 64]);
        fs.set_read_delay(Some(Duration::from_millis(100)));
        let (engine, _events) = engine(&fs, 8, RetryPolicy::none());
        let mut s = session(64);
        let token = CancellationToken::new();
        let stop = StopSignal::new(token.clone(), None);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            token.cancel();
        });

        let result = engine
            .sync_file(
                Path::new("/src/big"),
                Path::new("/dst/big"),
                &rel("big"),
                &mut s,
                &stop,
            )
            .await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(TransferError::Stopped(StopReason::Cancelled))));
        assert!(!fs.exists("/dst/big"));
        assert!(!fs.exists(partial_path(Path::new("/dst/big"))));
        assert_eq!(s.transferred_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_transfer() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/big", vec![0u8; 64]);
        fs.set_read_delay(Some(Duration::from_millis(100)));
        let (engine, _events) = engine(&fs, 8, RetryPolicy::none());
        let mut s = session(64);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(150);

        let result = engine
            .sync_file(
                Path::new("/src/big"),
                Path::new("/dst/big"),
                &rel("big"),
                &mut s,
                &StopSignal::new(CancellationToken::new(), Some(deadline)),
            )
            .await;
        assert!(matches!(result, Err(TransferError::Stopped(StopReason::TimedOut))));
        assert!(!fs.exists(partial_path(Path::new("/dst/big"))));
    }
}
