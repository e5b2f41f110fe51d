//! Sync events
//!
//! Typed events published by the engine on its broadcast channel.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConflictResolution, RelativePath, SessionId, SessionStatus};

/// Event published while sessions run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A session was admitted and started detection
    #[serde(rename = "sync.started")]
    Started {
        session_id: SessionId,
        source: PathBuf,
        destination: PathBuf,
    },
    /// A chunk of a file was written
    #[serde(rename = "sync.progress")]
    Progress {
        session_id: SessionId,
        file: RelativePath,
        /// Session byte progress, 0 to 100
        progress: f64,
        /// Zero-based index of the chunk within the file
        chunk_index: u64,
    },
    /// A session reached a terminal state
    #[serde(rename = "sync.completed")]
    Completed {
        session_id: SessionId,
        status: SessionStatus,
        files_processed: u64,
        transferred_bytes: u64,
    },
    /// A diverged path was resolved
    #[serde(rename = "sync.conflictResolved")]
    ConflictResolved {
        session_id: SessionId,
        resolution: ConflictResolution,
    },
    /// A periodic trigger fired for a pair
    #[serde(rename = "sync.autoCheck")]
    AutoCheck {
        source: PathBuf,
        destination: PathBuf,
        at: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Started { .. } => "sync.started",
            SyncEvent::Progress { .. } => "sync.progress",
            SyncEvent::Completed { .. } => "sync.completed",
            SyncEvent::ConflictResolved { .. } => "sync.conflictResolved",
            SyncEvent::AutoCheck { .. } => "sync.autoCheck",
        }
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            SyncEvent::Started { session_id, .. }
            | SyncEvent::Progress { session_id, .. }
            | SyncEvent::Completed { session_id, .. }
            | SyncEvent::ConflictResolved { session_id, .. } => Some(session_id),
            SyncEvent::AutoCheck { .. } => None,
        }
    }
}
