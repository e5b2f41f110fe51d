//! SyncSession domain entity
//!
//! This module defines the SyncSession entity which tracks the state
//! and progress of one incremental sync run between a source and a
//! destination root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::ConflictResolution;
use super::errors::DomainError;
use super::file_record::ChangeSet;
use super::newtypes::{RelativePath, SessionId};

/// Status of a sync session
///
/// Transitions are monotonic: `Pending → InProgress → {Completed | Failed}`.
/// A queued session may also go straight from `Pending` to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for an admission permit
    Pending,
    /// Session is currently running
    InProgress,
    /// Session ran to the end (possibly with per-file errors)
    Completed,
    /// Session was aborted with a reason
    Failed(String),
}

impl SessionStatus {
    /// Returns true if the session is still running
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SessionStatus::InProgress)
    }

    /// Returns true if the session reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed(_))
    }

    /// Returns true if the session completed
    pub fn is_success(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }

    /// Returns true if the session failed
    pub fn is_failed(&self) -> bool {
        matches!(self, SessionStatus::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed(_) => "failed",
        }
    }

    fn can_transition_to(&self, target: &SessionStatus) -> bool {
        matches!(
            (self, target),
            (SessionStatus::Pending, SessionStatus::InProgress)
                | (SessionStatus::Pending, SessionStatus::Failed(_))
                | (SessionStatus::InProgress, SessionStatus::Completed)
                | (SessionStatus::InProgress, SessionStatus::Failed(_))
        )
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Pending
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Failed(msg) => write!(f, "failed: {}", msg),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Error attributed to a single file during a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    /// Path of the file that failed
    file: RelativePath,
    /// Human-readable error message
    error: String,
}

impl FileError {
    /// Creates a new FileError
    pub fn new(file: RelativePath, error: impl Into<String>) -> Self {
        Self {
            file,
            error: error.into(),
        }
    }

    /// Returns the path that failed
    pub fn file(&self) -> &RelativePath {
        &self.file
    }

    /// Returns the error message
    pub fn error(&self) -> &str {
        &self.error
    }
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.file, self.error)
    }
}

/// Represents one synchronization session
///
/// A SyncSession is created by the orchestrator, mutated while the run
/// progresses and becomes immutable once appended to the sync history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Unique identifier for this session
    id: SessionId,
    /// Source root
    source: PathBuf,
    /// Destination root
    destination: PathBuf,
    /// When the session was created, then when it was admitted
    start_time: DateTime<Utc>,
    /// When the session reached a terminal state
    end_time: Option<DateTime<Utc>>,
    /// Current status of the session
    status: SessionStatus,
    /// Byte progress, 0 to 100
    progress: f64,
    /// Bytes written to the destination so far
    transferred_bytes: u64,
    /// Sum of the sizes of all files to transfer
    total_bytes: u64,
    /// Files transferred (or deliberately kept) so far
    files_processed: u64,
    /// Number of files to transfer
    total_files: u64,
    /// Destination files removed
    files_deleted: u64,
    /// Per-file transfer errors
    errors: Vec<FileError>,
    /// Non-fatal detection and deletion problems
    warnings: Vec<String>,
    /// Conflicts resolved during this run
    conflicts: Vec<ConflictResolution>,
    /// The change set this session acted on
    change_set: ChangeSet,
}

impl SyncSession {
    /// Creates a new Pending session for a source/destination pair
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            source: source.into(),
            destination: destination.into(),
            start_time: created_at,
            end_time: None,
            status: SessionStatus::Pending,
            progress: 0.0,
            transferred_bytes: 0,
            total_bytes: 0,
            files_processed: 0,
            total_files: 0,
            files_deleted: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
            change_set: ChangeSet::default(),
        }
    }

    // --- Getters ---

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Returns the byte progress as a percentage (0.0 to 100.0)
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn files_deleted(&self) -> u64 {
        self.files_deleted
    }

    pub fn errors(&self) -> &[FileError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn conflicts(&self) -> &[ConflictResolution] {
        &self.conflicts
    }

    pub fn change_set(&self) -> &ChangeSet {
        &self.change_set
    }

    // --- Computed Properties ---

    /// Returns the duration of the session, if it has ended
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Returns true if the session is still running
    pub fn is_in_progress(&self) -> bool {
        self.status.is_in_progress()
    }

    // --- Lifecycle ---

    fn transition(&mut self, target: SessionStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(&target) {
            return Err(DomainError::InvalidState {
                from: self.status.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Marks the session as admitted and running
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless the session is Pending
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(SessionStatus::InProgress)?;
        self.start_time = at;
        Ok(())
    }

    /// Marks the session as completed
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless the session is InProgress
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(SessionStatus::Completed)?;
        self.end_time = Some(at);
        Ok(())
    }

    /// Marks the session as failed with a reason
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the session already finished
    pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(SessionStatus::Failed(reason.into()))?;
        self.end_time = Some(at);
        Ok(())
    }

    // --- Progress ---

    /// Records the change set and the totals derived from it
    pub fn set_plan(&mut self, change_set: ChangeSet, total_files: u64, total_bytes: u64) {
        self.change_set = change_set;
        self.total_files = total_files;
        self.total_bytes = total_bytes;
        self.recompute_progress();
    }

    /// Adds transferred bytes and recomputes progress
    pub fn add_transferred(&mut self, bytes: u64) {
        self.transferred_bytes = self.transferred_bytes.saturating_add(bytes);
        self.recompute_progress();
    }

    /// Subtracts bytes counted by an attempt that was rolled back
    pub fn rewind_transferred(&mut self, bytes: u64) {
        self.transferred_bytes = self.transferred_bytes.saturating_sub(bytes);
        self.recompute_progress();
    }

    /// Counts a file as processed
    pub fn record_file_processed(&mut self) {
        self.files_processed += 1;
    }

    /// Counts a destination file as deleted
    pub fn record_file_deleted(&mut self) {
        self.files_deleted += 1;
    }

    pub fn add_error(&mut self, error: FileError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn add_conflict(&mut self, resolution: ConflictResolution) {
        self.conflicts.push(resolution);
    }

    fn recompute_progress(&mut self) {
        self.progress = if self.total_bytes == 0 {
            100.0
        } else {
            (self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        };
    }
}
