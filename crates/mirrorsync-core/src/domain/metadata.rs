//! Persisted sync metadata
//!
//! `SyncMetadata` is the snapshot written by the metadata store: the
//! per-pair hash index plus a bounded history of finished sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, RelativePath, SyncPairKey};
use super::session::SyncSession;

/// Path → content hash for one sync pair
pub type HashIndex = BTreeMap<RelativePath, ContentHash>;

/// Snapshot of everything the engine persists between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Layout version of this snapshot
    pub schema_version: u32,
    /// Hash index, partitioned per sync pair
    pub file_hashes: BTreeMap<SyncPairKey, HashIndex>,
    /// Finished sessions, oldest first
    pub sync_history: Vec<SyncSession>,
    /// When this snapshot was last written
    pub last_saved: Option<DateTime<Utc>>,
}

impl SyncMetadata {
    /// Current on-disk layout version
    pub const SCHEMA_VERSION: u32 = 1;

    /// Creates an empty snapshot at the current schema version
    pub fn empty() -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION,
            file_hashes: BTreeMap::new(),
            sync_history: Vec::new(),
            last_saved: None,
        }
    }

    /// Appends a finished session, evicting the oldest entries past `limit`
    pub fn push_history(&mut self, session: SyncSession, limit: usize) {
        self.sync_history.push(session);
        self.truncate_history(limit);
    }

    /// Drops the oldest history entries until at most `limit` remain
    pub fn truncate_history(&mut self, limit: usize) {
        if self.sync_history.len() > limit {
            let excess = self.sync_history.len() - limit;
            self.sync_history.drain(..excess);
        }
    }

    /// Returns the hash index of one pair, if it has one
    pub fn hashes_for(&self, pair: &SyncPairKey) -> Option<&HashIndex> {
        self.file_hashes.get(pair)
    }
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn session() -> SyncSession {
        SyncSession::new("/s", "/d", Utc::now())
    }

    #[test]
    fn test_push_history_evicts_oldest() {
        let mut meta = SyncMetadata::empty();
        let first = session();
        let first_id = *first.id();
        meta.push_history(first, 2);
        meta.push_history(session(), 2);
        meta.push_history(session(), 2);

        assert_eq!(meta.sync_history.len(), 2);
        assert!(meta.sync_history.iter().all(|s| *s.id() != first_id));
    }

    #[test]
    fn test_truncate_history_zero() {
        let mut meta = SyncMetadata::empty();
        meta.push_history(session(), 10);
        meta.truncate_history(0);
        assert!(meta.sync_history.is_empty());
    }

    #[test]
    fn test_json_layout() {
        let mut meta = SyncMetadata::empty();
        let pair = SyncPairKey::new(Path::new("/s"), Path::new("/d"));
        meta.file_hashes
            .entry(pair.clone())
            .or_default()
            .insert(RelativePath::new("a.txt").unwrap(), ContentHash::empty());

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["schema_version"], 1);
        assert_eq!(
            value["file_hashes"]["/s => /d"]["a.txt"],
            ContentHash::EMPTY
        );

        let back: SyncMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back.hashes_for(&pair).map(|h| h.len()), Some(1));
    }
}
