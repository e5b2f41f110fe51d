//! Change detection
//!
//! Walks the source tree depth-first in name order, hashes every regular
//! file and classifies it against the pair's hash index:
//!
//! - path not in the index: added
//! - path in the index with a different hash: modified
//! - indexed path no longer present: deleted
//!
//! Symlinks and special files are never followed or synced. A directory or
//! file that cannot be read is reported as a [`DetectionError`] and its
//! indexed entries are left alone rather than classified as deleted.
//!
//! Once the walk finishes, the new hashes and removals are written to the
//! index in a single operation. The prior hashes are returned so the
//! orchestrator can revert paths whose transfer never happened.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use mirrorsync_core::domain::{
    ChangeSet, ContentHash, FileRecord, HashIndex, RelativePath, SyncPairKey,
};
use mirrorsync_core::ports::{EntryKind, IFileSystem};

use crate::index::IndexHandle;
use crate::stop::StopSignal;
use crate::SyncError;

/// A path the walk could not read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionError {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one detection pass
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub change_set: ChangeSet,
    /// Every regular file seen in the source, keyed by relative path
    pub records: BTreeMap<RelativePath, FileRecord>,
    /// Index hashes before this pass, for modified and deleted paths
    pub prior_hashes: HashMap<RelativePath, ContentHash>,
    pub errors: Vec<DetectionError>,
}

impl Detection {
    /// Index hash of `path` before this pass
    pub fn prior_hash(&self, path: &RelativePath) -> Option<&ContentHash> {
        self.prior_hashes.get(path)
    }

    /// Total bytes of the added and modified files
    pub fn bytes_to_sync(&self) -> u64 {
        self.change_set
            .files_to_sync()
            .iter()
            .filter_map(|p| self.records.get(p))
            .map(FileRecord::size)
            .sum()
    }
}

/// State accumulated while walking one tree
#[derive(Default)]
struct Walk {
    records: BTreeMap<RelativePath, FileRecord>,
    unscanned: Vec<RelativePath>,
    errors: Vec<DetectionError>,
}

impl Walk {
    fn unreadable(&mut self, path: &Path, relative: Option<RelativePath>, error: &anyhow::Error) {
        warn!(path = %path.display(), error = %error, "Skipping unreadable path");
        self.errors.push(DetectionError {
            path: path.to_path_buf(),
            error: format!("{error:#}"),
        });
        if let Some(relative) = relative {
            self.unscanned.push(relative);
        }
    }

    fn is_unscanned(&self, path: &RelativePath) -> bool {
        self.unscanned.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Compares a source tree with the pair's hash index
pub struct ChangeDetector {
    fs: Arc<dyn IFileSystem>,
    index: IndexHandle,
}

impl ChangeDetector {
    pub fn new(fs: Arc<dyn IFileSystem>, index: IndexHandle) -> Self {
        Self { fs, index }
    }

    /// Detects changes under `source_root` and records them in the index
    ///
    /// # Errors
    /// - `SyncError::SourceUnavailable` if the root is missing, not a
    ///   directory, or cannot be listed
    /// - `SyncError::Stopped` if the stop signal fires mid-walk; the index
    ///   is left untouched in that case
    #[instrument(skip(self, stop), fields(pair = %pair))]
    pub async fn detect_changes(
        &self,
        pair: &SyncPairKey,
        source_root: &Path,
        stop: &StopSignal,
    ) -> Result<Detection, SyncError> {
        let unavailable = |reason: String| SyncError::SourceUnavailable {
            path: source_root.to_path_buf(),
            reason,
        };

        let root_state = self
            .fs
            .stat(source_root)
            .await
            .map_err(|e| unavailable(format!("{e:#}")))?;
        if !root_state.exists {
            return Err(unavailable("does not exist".to_string()));
        }
        if !root_state.is_directory() {
            return Err(unavailable("not a directory".to_string()));
        }

        let prior = self.index.snapshot(pair).await?;

        let mut walk = Walk::default();
        // the root itself must be listable; deeper failures are per-path
        let entries = self
            .fs
            .read_dir(source_root)
            .await
            .map_err(|e| unavailable(format!("{e:#}")))?;
        for entry in entries {
            stop.check().map_err(SyncError::Stopped)?;
            self.visit(source_root, entry.path, entry.kind, &prior, &mut walk, stop)
                .await?;
        }

        let detection = classify(prior, walk);
        let updates = detection
            .change_set
            .files_to_sync()
            .into_iter()
            .filter_map(|p| {
                let hash = detection.records.get(&p)?.content_hash().clone();
                Some((p, hash))
            })
            .collect();
        self.index
            .apply(pair, updates, detection.change_set.deleted().to_vec())
            .await?;

        debug!(
            added = detection.change_set.added().len(),
            modified = detection.change_set.modified().len(),
            deleted = detection.change_set.deleted().len(),
            errors = detection.errors.len(),
            "Change detection complete"
        );
        Ok(detection)
    }

    fn visit<'a>(
        &'a self,
        root: &'a Path,
        path: PathBuf,
        kind: EntryKind,
        prior: &'a HashIndex,
        walk: &'a mut Walk,
        stop: &'a StopSignal,
    ) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>> {
        Box::pin(async move {
            let relative = match RelativePath::from_root(root, &path) {
                Ok(r) => r,
                Err(err) => {
                    walk.unreadable(&path, None, &anyhow::Error::from(err));
                    return Ok(());
                }
            };

            match kind {
                EntryKind::Directory => {
                    let entries = match self.fs.read_dir(&path).await {
                        Ok(entries) => entries,
                        Err(err) => {
                            walk.unreadable(&path, Some(relative), &err);
                            return Ok(());
                        }
                    };
                    for entry in entries {
                        stop.check().map_err(SyncError::Stopped)?;
                        self.visit(root, entry.path, entry.kind, prior, walk, stop)
                            .await?;
                    }
                }
                EntryKind::File => match self.record(&path, relative.clone()).await {
                    Ok(record) => {
                        walk.records.insert(relative, record);
                    }
                    Err(err) => walk.unreadable(&path, Some(relative), &err),
                },
                EntryKind::Symlink | EntryKind::Other => {
                    debug!(path = %path.display(), ?kind, "Skipping non-regular entry");
                }
            }
            Ok(())
        })
    }

    async fn record(&self, path: &Path, relative: RelativePath) -> anyhow::Result<FileRecord> {
        let state = self.fs.stat(path).await?;
        let hash = self.fs.compute_hash(path).await?;
        let modified: DateTime<Utc> = state.modified.unwrap_or_default();
        Ok(FileRecord::new(relative, hash, state.size, modified))
    }
}

fn classify(prior: HashIndex, walk: Walk) -> Detection {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut prior_hashes = HashMap::new();

    for (path, record) in &walk.records {
        match prior.get(path) {
            None => added.push(path.clone()),
            Some(old) if old != record.content_hash() => {
                modified.push(path.clone());
                prior_hashes.insert(path.clone(), old.clone());
            }
            Some(_) => {}
        }
    }

    let seen: HashSet<&RelativePath> = walk.records.keys().collect();
    let mut deleted = Vec::new();
    for (path, old) in &prior {
        if seen.contains(path) || walk.is_unscanned(path) {
            continue;
        }
        deleted.push(path.clone());
        prior_hashes.insert(path.clone(), old.clone());
    }

    Detection {
        change_set: ChangeSet::new(added, modified, deleted),
        records: walk.records,
        prior_hashes,
        errors: walk.errors,
    }
}
