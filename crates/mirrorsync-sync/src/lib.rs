//! MirrorSync Sync - Incremental synchronization engine
//!
//! Provides:
//! - Hash-based change detection against a persisted per-pair index
//! - Chunked, cancellable file transfer with atomic replace
//! - Session orchestration with admission control and bounded history
//! - Conflict-checked deletion propagation
//!
//! ## Modules
//!
//! - [`orchestrator`] - Session lifecycle, admission, cancellation
//! - [`detector`] - Source tree walk and change classification
//! - [`transfer`] - Chunked streaming of one file
//! - [`index`] - Single-writer task owning the hash index and history
//! - [`metadata`] - JSON snapshot store
//! - [`filesystem`] / [`memory`] - `IFileSystem` adapters
//! - [`events`] - Broadcast event bus
//! - [`retry`] - Exponential backoff for transient failures

pub mod detector;
pub mod events;
pub mod filesystem;
pub mod index;
pub mod memory;
pub mod metadata;
pub mod orchestrator;
pub mod retry;
pub mod stop;
pub mod transfer;

use std::path::PathBuf;

use thiserror::Error;

use mirrorsync_core::domain::SyncSession;

pub use orchestrator::{ActiveSessionInfo, SyncOptions, SyncOrchestrator};

/// Errors returned by the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// Every session slot is busy and the request asked not to wait
    #[error("admission rejected: {limit} sessions already in progress")]
    AdmissionRejected { limit: usize },

    /// The session was aborted; it has been recorded in history as Failed
    #[error("session {} failed: {reason}", session.id())]
    SessionFailed {
        session: Box<SyncSession>,
        reason: String,
    },

    /// The source root is missing or unreadable
    #[error("source unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// The session was stopped by cancellation or its deadline
    #[error("{0}")]
    Stopped(stop::StopReason),

    /// The index writer task is no longer running
    #[error("index writer unavailable: {0}")]
    IndexUnavailable(String),

    /// A domain-level error propagated from mirrorsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] mirrorsync_core::domain::DomainError),
}

/// Errors from transferring a single file
#[derive(Debug, Error)]
pub enum TransferError {
    /// An I/O error on the source or destination
    #[error("{0:#}")]
    Io(#[from] anyhow::Error),

    /// The session was stopped mid-transfer
    #[error("{0}")]
    Stopped(stop::StopReason),
}

impl TransferError {
    /// Returns true if a retry could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Io(err) => retry::is_transient_error(err),
            TransferError::Stopped(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "signal");
        assert!(TransferError::Io(anyhow::Error::from(io)).is_transient());

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(!TransferError::Io(anyhow::Error::from(denied)).is_transient());

        assert!(!TransferError::Stopped(stop::StopReason::Cancelled).is_transient());
    }

    #[test]
    fn test_admission_rejected_display() {
        let err = SyncError::AdmissionRejected { limit: 3 };
        assert_eq!(
            err.to_string(),
            "admission rejected: 3 sessions already in progress"
        );
    }
}
