//! Sync orchestrator
//!
//! Runs one incremental session per request:
//!
//! 1. Admission: a semaphore permit bounds InProgress sessions. Requests
//!    either wait in FIFO order (Pending) or are rejected outright.
//!    Sessions on the same source/destination pair are serialized.
//! 2. Change detection against the pair's hash index.
//! 3. Transfer of added and modified files, one at a time. In bidirectional
//!    mode a destination copy that changed since the last sync goes through
//!    the conflict resolver first.
//! 4. Conflict-checked deletion of removed files.
//! 5. Finalization: Completed sessions are committed to the persisted
//!    history; aborted ones are recorded as Failed and returned as
//!    [`SyncError::SessionFailed`].
//!
//! Paths whose transfer or deletion never happened have their index entry
//! reverted so the next run picks them up again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use mirrorsync_conflict::{has_diverged, ConflictResolver, PolicyEngine};
use mirrorsync_core::config::{AdmissionMode, Config, DeletionPolicy, SyncConfig, SyncMode};
use mirrorsync_core::domain::{
    normalize_root, ConflictResolution, ConflictStrategy, ContentHash, FileError, RelativePath,
    SessionId, SessionStatus, SyncPairKey, SyncSession, VersionInfo, Winner,
};
use mirrorsync_core::ports::{IClock, IFileSystem, IMetadataStore, SyncEvent};

use crate::detector::{ChangeDetector, Detection};
use crate::events::EventBus;
use crate::index::{IndexHandle, IndexWriter};
use crate::retry::RetryPolicy;
use crate::stop::StopSignal;
use crate::transfer::TransferEngine;
use crate::{SyncError, TransferError};

// ============================================================================
// Options
// ============================================================================

/// Per-request overrides of the configured defaults
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    mode: Option<SyncMode>,
    strategy: Option<ConflictStrategy>,
    admission: Option<AdmissionMode>,
    deletion: Option<DeletionPolicy>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Forces one conflict strategy for every path of the session
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_admission(mut self, admission: AdmissionMode) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn with_deletion(mut self, deletion: DeletionPolicy) -> Self {
        self.deletion = Some(deletion);
        self
    }

    /// Maximum running time, counted from admission
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancelling `token` cancels the session
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Settings resolved for one session
#[derive(Debug, Clone, Copy)]
struct Effective {
    mode: SyncMode,
    strategy: Option<ConflictStrategy>,
    admission: AdmissionMode,
    deletion: DeletionPolicy,
    timeout: Option<Duration>,
}

impl Effective {
    fn resolve(defaults: &SyncConfig, options: &SyncOptions) -> Self {
        Self {
            mode: options.mode.unwrap_or(defaults.mode),
            strategy: options.strategy,
            admission: options.admission.unwrap_or(defaults.admission),
            deletion: options.deletion.unwrap_or(defaults.deletion),
            timeout: options.timeout.or_else(|| defaults.session_timeout()),
        }
    }
}

// ============================================================================
// Active session registry
// ============================================================================

/// Snapshot of a registered session
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSessionInfo {
    pub id: SessionId,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub status: SessionStatus,
}

#[derive(Debug)]
struct ActiveSession {
    token: CancellationToken,
    source: PathBuf,
    destination: PathBuf,
    status: SessionStatus,
}

/// Removes a session from the registry when dropped
struct Registration<'a> {
    active: &'a DashMap<SessionId, ActiveSession>,
    id: SessionId,
}

impl Registration<'_> {
    fn set_status(&self, status: SessionStatus) {
        if let Some(mut entry) = self.active.get_mut(&self.id) {
            entry.status = status;
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Permit and pair lock held while a session is InProgress
struct Admission {
    _permit: OwnedSemaphorePermit,
    _pair: OwnedMutexGuard<()>,
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Entry point of the sync engine
///
/// Built from injected adapters; there is no global instance. Share it
/// behind an `Arc` to run sessions from several tasks.
pub struct SyncOrchestrator {
    fs: Arc<dyn IFileSystem>,
    clock: Arc<dyn IClock>,
    index: IndexHandle,
    detector: ChangeDetector,
    transfer: TransferEngine,
    resolver: ConflictResolver,
    events: EventBus,
    defaults: SyncConfig,
    admission: Arc<Semaphore>,
    pair_locks: DashMap<SyncPairKey, Arc<Mutex<()>>>,
    active: DashMap<SessionId, ActiveSession>,
    shutdown: CancellationToken,
}

impl SyncOrchestrator {
    /// Loads the metadata snapshot and starts the index writer
    pub async fn new(
        fs: Arc<dyn IFileSystem>,
        clock: Arc<dyn IClock>,
        store: Arc<dyn IMetadataStore>,
        config: &Config,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let index = IndexWriter::spawn(
            store,
            Arc::clone(&clock),
            config.metadata.history_limit,
            retry,
        )
        .await;
        let events = EventBus::new(config.sync.event_buffer);
        let transfer = TransferEngine::new(
            Arc::clone(&fs),
            config.sync.chunk_size_bytes(),
            config.sync.max_inflight_transfers,
            events.clone(),
            retry,
        );

        Self {
            detector: ChangeDetector::new(Arc::clone(&fs), index.clone()),
            fs,
            clock,
            index,
            transfer,
            resolver: ConflictResolver::new(PolicyEngine::from(&config.conflicts)),
            events,
            defaults: config.sync.clone(),
            admission: Arc::new(Semaphore::new(config.sync.max_concurrent_sync.max(1))),
            pair_locks: DashMap::new(),
            active: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Maximum number of sessions InProgress at once
    pub fn max_concurrent_sync(&self) -> usize {
        self.defaults.max_concurrent_sync.max(1)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Runs one incremental sync of `source` into `destination`
    ///
    /// # Returns
    /// The Completed session, possibly carrying per-file errors and warnings
    ///
    /// # Errors
    /// - `SyncError::AdmissionRejected` in reject mode when every slot is busy;
    ///   no session is created
    /// - `SyncError::SessionFailed` when the run was aborted (source
    ///   unavailable, metadata persist failure, cancellation, timeout); the
    ///   Failed session has been appended to history
    #[instrument(skip(self, options), fields(source = %source.display(), destination = %destination.display()))]
    pub async fn perform_incremental_sync(
        &self,
        source: &Path,
        destination: &Path,
        options: SyncOptions,
    ) -> Result<SyncSession, SyncError> {
        let effective = Effective::resolve(&self.defaults, &options);
        let (source, destination) = (normalize_root(source), normalize_root(destination));
        let (source, destination) = (source.as_path(), destination.as_path());
        let pair = SyncPairKey::new(source, destination);

        // Step 1: Reject mode fails before any session exists
        let early_permit = match effective.admission {
            AdmissionMode::Reject => Some(
                Arc::clone(&self.admission)
                    .try_acquire_owned()
                    .map_err(|_| self.rejected())?,
            ),
            AdmissionMode::Queue => None,
        };

        // Step 2: Register as Pending
        let token = match &options.cancel {
            Some(token) => token.child_token(),
            None => self.shutdown.child_token(),
        };
        let mut session = SyncSession::new(source, destination, self.clock.now());
        let registration = self.register(&session, token.clone());
        debug!(session_id = %session.id(), "Session registered");

        let admission = match self.admit(&pair, effective.admission, early_permit, &token).await {
            Ok(admission) => admission,
            Err(err @ SyncError::AdmissionRejected { .. }) => {
                // never InProgress, so nothing is recorded
                drop(registration);
                return Err(err);
            }
            Err(err) => {
                drop(registration);
                return self.finish_failed(session, err.to_string()).await;
            }
        };

        // Step 3: Admitted; the deadline starts now
        session.start(self.clock.now())?;
        registration.set_status(session.status().clone());
        let stop = StopSignal::new(
            token,
            effective.timeout.map(|timeout| Instant::now() + timeout),
        );

        info!(
            session_id = %session.id(),
            mode = %effective.mode,
            "Starting sync session"
        );
        self.events.publish(SyncEvent::Started {
            session_id: *session.id(),
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });

        let outcome = self
            .run_session(&pair, &mut session, &effective, &stop)
            .await;

        // Step 4: Finalize while still holding the pair lock and permit
        let result = match outcome {
            Ok(()) => self.finish_completed(session).await,
            Err(SyncError::Stopped(reason)) => self.finish_failed(session, reason.to_string()).await,
            Err(err) => self.finish_failed(session, err.to_string()).await,
        };
        drop(admission);
        drop(registration);
        result
    }

    /// Publishes `AutoCheck` for a pair and runs it with default options
    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    pub async fn auto_check(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<SyncSession, SyncError> {
        self.events.publish(SyncEvent::AutoCheck {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            at: self.clock.now(),
        });
        self.perform_incremental_sync(source, destination, SyncOptions::default())
            .await
    }

    /// Cancels one Pending or InProgress session
    ///
    /// Returns false if no such session is registered.
    pub fn cancel(&self, id: &SessionId) -> bool {
        match self.active.get(id) {
            Some(entry) => {
                info!(session_id = %id, "Cancelling session");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every registered session; later requests still run
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.token.cancel();
        }
    }

    /// Cancels every session, current and future
    pub fn shutdown(&self) {
        info!(active = self.active.len(), "Shutting down sync orchestrator");
        self.shutdown.cancel();
    }

    pub fn active_sessions(&self) -> Vec<ActiveSessionInfo> {
        let mut sessions: Vec<ActiveSessionInfo> = self
            .active
            .iter()
            .map(|entry| ActiveSessionInfo {
                id: *entry.key(),
                source: entry.source.clone(),
                destination: entry.destination.clone(),
                status: entry.status.clone(),
            })
            .collect();
        sessions.sort_by_key(|s| s.id.to_string());
        sessions
    }

    /// Number of sessions currently InProgress
    pub fn in_progress_count(&self) -> usize {
        self.active
            .iter()
            .filter(|entry| entry.status.is_in_progress())
            .count()
    }

    /// Persisted sessions, oldest first, at most `limit` of the most recent
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<SyncSession>, SyncError> {
        self.index.history(limit).await
    }

    // ------------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------------

    fn register(&self, session: &SyncSession, token: CancellationToken) -> Registration<'_> {
        self.active.insert(
            *session.id(),
            ActiveSession {
                token,
                source: session.source().to_path_buf(),
                destination: session.destination().to_path_buf(),
                status: session.status().clone(),
            },
        );
        Registration {
            active: &self.active,
            id: *session.id(),
        }
    }

    fn pair_lock(&self, pair: &SyncPairKey) -> Arc<Mutex<()>> {
        Arc::clone(&self.pair_locks.entry(pair.clone()).or_default())
    }

    fn rejected(&self) -> SyncError {
        SyncError::AdmissionRejected {
            limit: self.max_concurrent_sync(),
        }
    }

    /// Waits for the pair lock and a session permit, unless cancelled first
    ///
    /// A permit is only held by a request that also holds its pair lock, so
    /// requests waiting on a busy pair never count against the limit. In
    /// reject mode the slot check is repeated once the pair lock is free.
    async fn admit(
        &self,
        pair: &SyncPairKey,
        mode: AdmissionMode,
        early_permit: Option<OwnedSemaphorePermit>,
        token: &CancellationToken,
    ) -> Result<Admission, SyncError> {
        let lock = self.pair_lock(pair);
        let (pair_guard, early_permit) = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => (guard, early_permit),
            Err(_) => {
                drop(early_permit);
                let guard = tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(SyncError::Stopped(crate::stop::StopReason::Cancelled)),
                    guard = lock.lock_owned() => guard,
                };
                (guard, None)
            }
        };

        let permit = match (early_permit, mode) {
            (Some(permit), _) => permit,
            (None, AdmissionMode::Reject) => Arc::clone(&self.admission)
                .try_acquire_owned()
                .map_err(|_| self.rejected())?,
            (None, AdmissionMode::Queue) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SyncError::Stopped(crate::stop::StopReason::Cancelled)),
                permit = Arc::clone(&self.admission).acquire_owned() => permit
                    .map_err(|e| SyncError::IndexUnavailable(format!("admission closed: {e}")))?,
            },
        };

        Ok(Admission {
            _permit: permit,
            _pair: pair_guard,
        })
    }

    // ------------------------------------------------------------------------
    // Session body
    // ------------------------------------------------------------------------

    async fn run_session(
        &self,
        pair: &SyncPairKey,
        session: &mut SyncSession,
        effective: &Effective,
        stop: &StopSignal,
    ) -> Result<(), SyncError> {
        let source = session.source().to_path_buf();
        let destination = session.destination().to_path_buf();

        // Step 1: Detect changes
        let detection = self.detector.detect_changes(pair, &source, stop).await?;
        for err in &detection.errors {
            session.add_warning(format!("{}: {}", err.path.display(), err.error));
        }

        let files = detection.change_set.files_to_sync();
        session.set_plan(
            detection.change_set.clone(),
            files.len() as u64,
            detection.bytes_to_sync(),
        );
        info!(
            session_id = %session.id(),
            files = files.len(),
            bytes = session.total_bytes(),
            deleted = detection.change_set.deleted().len(),
            "Change set computed"
        );

        // Step 2: Transfer added and modified files
        for (i, path) in files.iter().enumerate() {
            if let Err(reason) = stop.check() {
                self.revert_unfinished(pair, &detection, &files[i..]).await;
                return Err(SyncError::Stopped(reason));
            }

            let src = path.under(&source);
            let dst = path.under(&destination);

            if effective.mode == SyncMode::Bidirectional {
                match self
                    .check_conflict(path, &src, &dst, &detection, effective.strategy)
                    .await
                {
                    Ok(Some(resolution)) => {
                        let winner = resolution.winner();
                        session.add_conflict(resolution.clone());
                        self.events.publish(SyncEvent::ConflictResolved {
                            session_id: *session.id(),
                            resolution,
                        });
                        if winner == Winner::Remote {
                            debug!(file = %path, "Destination copy kept");
                            session.record_file_processed();
                            continue;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(file = %path, error = %format!("{err:#}"), "Could not compare destination copy");
                        session.add_error(FileError::new(path.clone(), format!("{err:#}")));
                        self.revert(pair, &detection, std::slice::from_ref(path)).await;
                        continue;
                    }
                }
            }

            match self.transfer.sync_file(&src, &dst, path, session, stop).await {
                Ok(_) => {}
                Err(TransferError::Stopped(reason)) => {
                    self.revert_unfinished(pair, &detection, &files[i..]).await;
                    return Err(SyncError::Stopped(reason));
                }
                Err(TransferError::Io(_)) => {
                    self.revert(pair, &detection, std::slice::from_ref(path)).await;
                }
            }
        }

        // Step 3: Propagate deletions
        let deleted = detection.change_set.deleted();
        for (j, path) in deleted.iter().enumerate() {
            if let Err(reason) = stop.check() {
                self.revert(pair, &detection, &deleted[j..]).await;
                return Err(SyncError::Stopped(reason));
            }
            self.delete_one(pair, path, &destination, &detection, effective.deletion, session)
                .await;
        }

        Ok(())
    }

    /// Returns a resolution if the destination copy diverged since the last sync
    async fn check_conflict(
        &self,
        path: &RelativePath,
        src: &Path,
        dst: &Path,
        detection: &Detection,
        strategy: Option<ConflictStrategy>,
    ) -> anyhow::Result<Option<ConflictResolution>> {
        let Some(record) = detection.records.get(path) else {
            return Ok(None);
        };
        let dest_state = self.fs.stat(dst).await?;
        if !dest_state.is_regular_file() {
            return Ok(None);
        }
        let dest_hash = self.fs.compute_hash(dst).await?;
        if !has_diverged(
            detection.prior_hash(path),
            record.content_hash(),
            Some(&dest_hash),
        ) {
            return Ok(None);
        }

        debug!(file = %path, source = %src.display(), "Destination diverged since last sync");
        let local = VersionInfo::new(record.size(), record.modified_at())
            .with_hash(record.content_hash().clone());
        let remote = VersionInfo::new(dest_state.size, dest_state.modified.unwrap_or_default())
            .with_hash(dest_hash);
        Ok(Some(self.resolver.resolve(
            path.clone(),
            local,
            remote,
            strategy,
            self.clock.now(),
        )))
    }

    async fn delete_one(
        &self,
        pair: &SyncPairKey,
        path: &RelativePath,
        destination: &Path,
        detection: &Detection,
        policy: DeletionPolicy,
        session: &mut SyncSession,
    ) {
        let dst = path.under(destination);

        if policy == DeletionPolicy::SkipModified {
            match self.destination_unchanged(&dst, detection.prior_hash(path)).await {
                Ok(DestinationCheck::Absent) => {
                    session.record_file_deleted();
                    return;
                }
                Ok(DestinationCheck::Unchanged) => {}
                Ok(DestinationCheck::Modified) => {
                    warn!(file = %path, "Destination modified since last sync, not deleting");
                    session.add_warning(format!(
                        "{path}: destination modified since last sync, not deleted"
                    ));
                    return;
                }
                Err(err) => {
                    session.add_warning(format!("{path}: could not check destination: {err:#}"));
                    self.revert(pair, detection, std::slice::from_ref(path)).await;
                    return;
                }
            }
        }

        match self.fs.remove_file(&dst).await {
            Ok(()) => {
                debug!(file = %path, "Destination file deleted");
                session.record_file_deleted();
            }
            Err(err) => {
                warn!(file = %path, error = %format!("{err:#}"), "Failed to delete destination file");
                session.add_warning(format!("{path}: delete failed: {err:#}"));
                self.revert(pair, detection, std::slice::from_ref(path)).await;
            }
        }
    }

    async fn destination_unchanged(
        &self,
        dst: &Path,
        prior: Option<&ContentHash>,
    ) -> anyhow::Result<DestinationCheck> {
        let state = self.fs.stat(dst).await?;
        if !state.exists {
            return Ok(DestinationCheck::Absent);
        }
        if !state.is_regular_file() {
            return Ok(DestinationCheck::Modified);
        }
        let hash = self.fs.compute_hash(dst).await?;
        Ok(if Some(&hash) == prior {
            DestinationCheck::Unchanged
        } else {
            DestinationCheck::Modified
        })
    }

    // ------------------------------------------------------------------------
    // Index reverts
    // ------------------------------------------------------------------------

    async fn revert(&self, pair: &SyncPairKey, detection: &Detection, paths: &[RelativePath]) {
        let entries = paths
            .iter()
            .map(|p| (p.clone(), detection.prior_hash(p).cloned()))
            .collect();
        if let Err(err) = self.index.revert(pair, entries).await {
            error!(error = %err, "Failed to revert index entries");
        }
    }

    /// Reverts the remaining transfers and every deletion of an aborted run
    async fn revert_unfinished(
        &self,
        pair: &SyncPairKey,
        detection: &Detection,
        remaining: &[RelativePath],
    ) {
        let mut paths = remaining.to_vec();
        paths.extend_from_slice(detection.change_set.deleted());
        self.revert(pair, detection, &paths).await;
    }

    // ------------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------------

    async fn finish_completed(&self, session: SyncSession) -> Result<SyncSession, SyncError> {
        let mut completed = session.clone();
        completed.complete(self.clock.now())?;

        match self.index.commit(completed.clone()).await {
            Ok(Ok(())) => {
                info!(
                    session_id = %completed.id(),
                    files = completed.files_processed(),
                    deleted = completed.files_deleted(),
                    bytes = completed.transferred_bytes(),
                    errors = completed.errors().len(),
                    "Sync session completed"
                );
                self.publish_completed(&completed);
                Ok(completed)
            }
            Ok(Err(err)) => {
                self.finish_failed(session, format!("metadata persist failed: {err:#}"))
                    .await
            }
            Err(err) => self.finish_failed(session, err.to_string()).await,
        }
    }

    async fn finish_failed(
        &self,
        mut session: SyncSession,
        reason: String,
    ) -> Result<SyncSession, SyncError> {
        if let Err(err) = session.fail(reason.clone(), self.clock.now()) {
            error!(session_id = %session.id(), error = %err, "Could not mark session failed");
        }
        error!(session_id = %session.id(), %reason, "Sync session failed");

        if let Err(err) = self.index.record(session.clone()).await {
            error!(session_id = %session.id(), error = %err, "Failed session not recorded");
        }
        self.publish_completed(&session);

        Err(SyncError::SessionFailed {
            session: Box::new(session),
            reason,
        })
    }

    fn publish_completed(&self, session: &SyncSession) {
        self.events.publish(SyncEvent::Completed {
            session_id: *session.id(),
            status: session.status().clone(),
            files_processed: session.files_processed(),
            transferred_bytes: session.transferred_bytes(),
        });
    }
}

enum DestinationCheck {
    Absent,
    Unchanged,
    Modified,
}
