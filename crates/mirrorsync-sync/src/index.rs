//! Hash index and history serialization
//!
//! Provides [`IndexWriter`], a task that owns the in-memory [`SyncMetadata`]
//! and applies every read and mutation sequentially from an mpsc channel.
//! Callers talk to it through the cloneable [`IndexHandle`].
//!
//! ```text
//! ┌─────────────┐     IndexOp      ┌──────────────────┐
//! │  sessions   │ ───────────────► │   IndexWriter    │
//! │  (callers)  │                  │      task        │
//! └─────────────┘                  └──────────────────┘
//!       │                                   │
//!       │        Result via oneshot         │
//!       │ ◄─────────────────────────────────┤
//!       │                                   ▼
//!       │                          ┌─────────────────┐
//!       │                          │ IMetadataStore  │
//!       │                          └─────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use mirrorsync_core::domain::{
    ContentHash, HashIndex, RelativePath, SyncMetadata, SyncPairKey, SyncSession,
};
use mirrorsync_core::ports::{IClock, IMetadataStore};

use crate::retry::{with_retry, RetryPolicy};
use crate::SyncError;

/// Result type for index operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Channel capacity between handles and the writer
const CHANNEL_CAPACITY: usize = 100;

// ============================================================================
// IndexOp enum
// ============================================================================

/// Operations serialized through the IndexWriter
///
/// Each variant carries its data plus a oneshot sender for the result.
#[derive(Debug)]
pub enum IndexOp {
    /// Copy of one pair's hash index
    Snapshot {
        pair: SyncPairKey,
        reply: oneshot::Sender<HashIndex>,
    },

    /// Record new hashes and drop deleted paths for one pair
    Apply {
        pair: SyncPairKey,
        updates: Vec<(RelativePath, ContentHash)>,
        removals: Vec<RelativePath>,
        reply: oneshot::Sender<()>,
    },

    /// Restore paths to their prior hash, or remove them if they had none
    Revert {
        pair: SyncPairKey,
        entries: Vec<(RelativePath, Option<ContentHash>)>,
        reply: oneshot::Sender<()>,
    },

    /// Append a finished session and persist; rolled back if persisting fails
    Commit {
        session: Box<SyncSession>,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Append a finished session and persist best-effort
    Record {
        session: Box<SyncSession>,
        reply: oneshot::Sender<()>,
    },

    /// Most recent sessions, oldest first
    History {
        limit: Option<usize>,
        reply: oneshot::Sender<Vec<SyncSession>>,
    },
}

// ============================================================================
// IndexHandle
// ============================================================================

/// Handle for sending operations to the IndexWriter
///
/// This handle can be cloned and shared across sessions. All operations
/// are processed sequentially by the IndexWriter task.
#[derive(Clone, Debug)]
pub struct IndexHandle {
    tx: mpsc::Sender<IndexOp>,
}

impl IndexHandle {
    async fn request<T>(&self, op: IndexOp, rx: oneshot::Receiver<T>) -> Result<T> {
        self.tx
            .send(op)
            .await
            .map_err(|_| SyncError::IndexUnavailable("IndexWriter task has stopped".to_string()))?;
        rx.await
            .map_err(|_| SyncError::IndexUnavailable("IndexWriter response lost".to_string()))
    }

    /// Returns a copy of the pair's current hash index
    pub async fn snapshot(&self, pair: &SyncPairKey) -> Result<HashIndex> {
        let (reply, rx) = oneshot::channel();
        self.request(
            IndexOp::Snapshot {
                pair: pair.clone(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Applies a detection pass's side effects
    pub async fn apply(
        &self,
        pair: &SyncPairKey,
        updates: Vec<(RelativePath, ContentHash)>,
        removals: Vec<RelativePath>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            IndexOp::Apply {
                pair: pair.clone(),
                updates,
                removals,
                reply,
            },
            rx,
        )
        .await
    }

    /// Reverts paths whose transfer or deletion did not happen
    pub async fn revert(
        &self,
        pair: &SyncPairKey,
        entries: Vec<(RelativePath, Option<ContentHash>)>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        self.request(
            IndexOp::Revert {
                pair: pair.clone(),
                entries,
                reply,
            },
            rx,
        )
        .await
    }

    /// Appends a session to history and persists the snapshot
    ///
    /// The outer error means the writer is gone; the inner one means the
    /// snapshot could not be persisted and the append was undone.
    pub async fn commit(&self, session: SyncSession) -> Result<anyhow::Result<()>> {
        let (reply, rx) = oneshot::channel();
        self.request(
            IndexOp::Commit {
                session: Box::new(session),
                reply,
            },
            rx,
        )
        .await
    }

    /// Appends a session to history, persisting if possible
    pub async fn record(&self, session: SyncSession) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            IndexOp::Record {
                session: Box::new(session),
                reply,
            },
            rx,
        )
        .await
    }

    /// Returns up to `limit` of the most recent sessions, oldest first
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<SyncSession>> {
        let (reply, rx) = oneshot::channel();
        self.request(IndexOp::History { limit, reply }, rx).await
    }
}

// ============================================================================
// IndexWriter
// ============================================================================

/// Owns the hash index and sync history
///
/// Runs as a tokio task processing [`IndexOp`]s one at a time until every
/// [`IndexHandle`] has been dropped.
pub struct IndexWriter {
    rx: mpsc::Receiver<IndexOp>,
    metadata: SyncMetadata,
    store: Arc<dyn IMetadataStore>,
    clock: Arc<dyn IClock>,
    history_limit: usize,
    retry: RetryPolicy,
}

impl IndexWriter {
    /// Creates a writer over an already-loaded snapshot
    ///
    /// The caller must spawn the writer by calling `run()`.
    pub fn new(
        metadata: SyncMetadata,
        store: Arc<dyn IMetadataStore>,
        clock: Arc<dyn IClock>,
        history_limit: usize,
        retry: RetryPolicy,
    ) -> (Self, IndexHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let writer = Self {
            rx,
            metadata,
            store,
            clock,
            history_limit,
            retry,
        };
        (writer, IndexHandle { tx })
    }

    /// Loads the snapshot from `store` and spawns the writer task
    pub async fn spawn(
        store: Arc<dyn IMetadataStore>,
        clock: Arc<dyn IClock>,
        history_limit: usize,
        retry: RetryPolicy,
    ) -> IndexHandle {
        let metadata = store.load().await;
        let (writer, handle) = Self::new(metadata, store, clock, history_limit, retry);
        tokio::spawn(writer.run());
        handle
    }

    /// Runs the writer loop until the channel is closed
    pub async fn run(mut self) {
        debug!("IndexWriter task started");

        while let Some(op) = self.rx.recv().await {
            self.process_operation(op).await;
        }

        debug!("IndexWriter task stopped (all handles dropped)");
    }

    async fn persist(&mut self) -> anyhow::Result<()> {
        self.metadata.last_saved = Some(self.clock.now());
        let store = Arc::clone(&self.store);
        let snapshot = &self.metadata;
        with_retry(&self.retry, "persist metadata", || store.save(snapshot)).await
    }

    async fn process_operation(&mut self, op: IndexOp) {
        match op {
            IndexOp::Snapshot { pair, reply } => {
                trace!(%pair, "Processing Snapshot");
                let index = self.metadata.hashes_for(&pair).cloned().unwrap_or_default();
                let _ = reply.send(index);
            }

            IndexOp::Apply {
                pair,
                updates,
                removals,
                reply,
            } => {
                trace!(%pair, updates = updates.len(), removals = removals.len(), "Processing Apply");
                let index = self.metadata.file_hashes.entry(pair).or_default();
                for (path, hash) in updates {
                    index.insert(path, hash);
                }
                for path in removals {
                    index.remove(&path);
                }
                let _ = reply.send(());
            }

            IndexOp::Revert {
                pair,
                entries,
                reply,
            } => {
                trace!(%pair, entries = entries.len(), "Processing Revert");
                let index = self.metadata.file_hashes.entry(pair).or_default();
                for (path, prior) in entries {
                    match prior {
                        Some(hash) => index.insert(path, hash),
                        None => index.remove(&path),
                    };
                }
                let _ = reply.send(());
            }

            IndexOp::Commit { session, reply } => {
                trace!(session_id = %session.id(), "Processing Commit");
                let previous_history = self.metadata.sync_history.clone();
                self.metadata.push_history(*session, self.history_limit);

                let result = self.persist().await;
                if let Err(e) = &result {
                    error!(error = %e, "Failed to persist metadata, rolling back history append");
                    self.metadata.sync_history = previous_history;
                }
                let _ = reply.send(result);
            }

            IndexOp::Record { session, reply } => {
                trace!(session_id = %session.id(), "Processing Record");
                self.metadata.push_history(*session, self.history_limit);
                if let Err(e) = self.persist().await {
                    error!(error = %e, "Failed to persist metadata after failed session");
                }
                let _ = reply.send(());
            }

            IndexOp::History { limit, reply } => {
                let history = &self.metadata.sync_history;
                let skip = limit.map_or(0, |l| history.len().saturating_sub(l));
                let _ = reply.send(history[skip..].to_vec());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::Utc;
    use mirrorsync_core::ports::SystemClock;

    use super::*;

    /// Store that records saves and can be told to fail
    #[derive(Default)]
    struct RecordingStore {
        saves: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl IMetadataStore for RecordingStore {
        async fn load(&self) -> SyncMetadata {
            SyncMetadata::empty()
        }

        async fn save(&self, _metadata: &SyncMetadata) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pair() -> SyncPairKey {
        SyncPairKey::new(Path::new("/s"), Path::new("/d"))
    }

    fn p(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    fn h(b: u8) -> ContentHash {
        ContentHash::from_digest(&[b; 32]).unwrap()
    }

    async fn spawn(store: Arc<RecordingStore>, limit: usize) -> IndexHandle {
        IndexWriter::spawn(store, Arc::new(SystemClock), limit, RetryPolicy::none()).await
    }

    fn finished_session() -> SyncSession {
        let mut s = SyncSession::new("/s", "/d", Utc::now());
        s.start(Utc::now()).unwrap();
        s.complete(Utc::now()).unwrap();
        s
    }

    #[tokio::test]
    async fn test_apply_and_snapshot() {
        let handle = spawn(Arc::default(), 10).await;
        handle
            .apply(&pair(), vec![(p("a"), h(1)), (p("b"), h(2))], vec![])
            .await
            .unwrap();
        handle.apply(&pair(), vec![], vec![p("a")]).await.unwrap();

        let index = handle.snapshot(&pair()).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&p("b")), Some(&h(2)));
    }

    #[tokio::test]
    async fn test_pairs_are_isolated() {
        let handle = spawn(Arc::default(), 10).await;
        let other = SyncPairKey::new(Path::new("/x"), Path::new("/y"));
        handle.apply(&pair(), vec![(p("a"), h(1))], vec![]).await.unwrap();

        assert!(handle.snapshot(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revert_restores_or_removes() {
        let handle = spawn(Arc::default(), 10).await;
        handle
            .apply(&pair(), vec![(p("old"), h(9)), (p("new"), h(2))], vec![])
            .await
            .unwrap();
        handle
            .revert(&pair(), vec![(p("old"), Some(h(1))), (p("new"), None)])
            .await
            .unwrap();

        let index = handle.snapshot(&pair()).await.unwrap();
        assert_eq!(index.get(&p("old")), Some(&h(1)));
        assert!(!index.contains_key(&p("new")));
    }

    #[tokio::test]
    async fn test_commit_persists_and_bounds_history() {
        let store = Arc::new(RecordingStore::default());
        let handle = spawn(Arc::clone(&store), 2).await;
        for _ in 0..3 {
            handle.commit(finished_session()).await.unwrap().unwrap();
        }

        assert_eq!(store.saves.load(Ordering::SeqCst), 3);
        assert_eq!(handle.history(None).await.unwrap().len(), 2);
        assert_eq!(handle.history(Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_rolls_back_on_persist_failure() {
        let store = Arc::new(RecordingStore::default());
        let handle = spawn(Arc::clone(&store), 10).await;
        store.fail.store(true, Ordering::SeqCst);

        let result = handle.commit(finished_session()).await.unwrap();
        assert!(result.is_err());
        assert!(handle.history(None).await.unwrap().is_empty());

        // a failed session is still recorded even though persisting fails
        handle.record(finished_session()).await.unwrap();
        assert_eq!(handle.history(None).await.unwrap().len(), 1);
    }
}
