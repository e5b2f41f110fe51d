//! JSON metadata store
//!
//! Persists [`SyncMetadata`] as a single pretty-printed JSON file. Writes go
//! to a hidden temporary sibling that is synced to disk and then renamed over
//! the target, so a crash mid-write leaves the previous snapshot intact. Loading never fails:
//! anything unreadable yields an empty snapshot.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use mirrorsync_core::config::MetadataConfig;
use mirrorsync_core::domain::SyncMetadata;
use mirrorsync_core::ports::IMetadataStore;

/// [`IMetadataStore`] backed by a JSON file on the local disk
#[derive(Debug, Clone)]
pub struct JsonMetadataStore {
    path: PathBuf,
    history_limit: usize,
}

impl JsonMetadataStore {
    pub fn new(path: impl Into<PathBuf>, history_limit: usize) -> Self {
        Self {
            path: path.into(),
            history_limit,
        }
    }

    /// Location of the snapshot
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "metadata.json".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

impl From<&MetadataConfig> for JsonMetadataStore {
    fn from(config: &MetadataConfig) -> Self {
        Self::new(config.path.clone(), config.history_limit)
    }
}

#[async_trait::async_trait]
impl IMetadataStore for JsonMetadataStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> SyncMetadata {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No metadata snapshot yet, starting empty");
                return SyncMetadata::empty();
            }
            Err(e) => {
                warn!(error = %e, "Metadata snapshot unreadable, starting empty");
                return SyncMetadata::empty();
            }
        };

        let metadata: SyncMetadata = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Metadata snapshot corrupt, starting empty");
                return SyncMetadata::empty();
            }
        };

        if metadata.schema_version != SyncMetadata::SCHEMA_VERSION {
            warn!(
                found = metadata.schema_version,
                expected = SyncMetadata::SCHEMA_VERSION,
                "Unknown metadata schema version, starting empty"
            );
            return SyncMetadata::empty();
        }

        debug!(
            pairs = metadata.file_hashes.len(),
            history = metadata.sync_history.len(),
            "Metadata loaded"
        );
        metadata
    }

    #[instrument(skip(self, metadata), fields(path = %self.path.display()))]
    async fn save(&self, metadata: &SyncMetadata) -> anyhow::Result<()> {
        let mut snapshot = metadata.clone();
        snapshot.truncate_history(self.history_limit);

        let json = serde_json::to_vec_pretty(&snapshot).context("serializing metadata")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let tmp_path = self.temp_path();
        write_durable(&tmp_path, &json)
            .await
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;

        debug!(bytes = json.len(), "Metadata saved");
        Ok(())
    }
}

/// Writes `data` and flushes it to disk before returning
async fn write_durable(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
