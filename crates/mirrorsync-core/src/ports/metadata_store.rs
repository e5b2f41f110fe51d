//! Metadata store port (driven/secondary port)
//!
//! Persists the hash index and sync history between process runs.

use crate::domain::SyncMetadata;

/// Port trait for the persisted [`SyncMetadata`] snapshot
#[async_trait::async_trait]
pub trait IMetadataStore: Send + Sync {
    /// Reads the persisted snapshot
    ///
    /// Never fails: a missing, unreadable or corrupt snapshot (including an
    /// unknown schema version) yields `SyncMetadata::empty()` and a warning.
    async fn load(&self) -> SyncMetadata;

    /// Writes the snapshot, replacing the previous one atomically
    ///
    /// Implementations truncate `sync_history` to their retention bound
    /// before writing.
    async fn save(&self, metadata: &SyncMetadata) -> anyhow::Result<()>;
}
