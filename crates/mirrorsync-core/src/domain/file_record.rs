//! FileRecord and ChangeSet
//!
//! A `FileRecord` is what one detection pass observed for a single file.
//! A `ChangeSet` is the classified difference between a pass and the
//! stored hash index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, RelativePath};

/// A file observed under a sync root during detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the sync root
    path: RelativePath,
    /// SHA-256 of the full file content
    content_hash: ContentHash,
    /// File size in bytes
    size: u64,
    /// Last modification time reported by the filesystem
    modified_at: DateTime<Utc>,
}

impl FileRecord {
    /// Creates a new FileRecord
    pub fn new(
        path: RelativePath,
        content_hash: ContentHash,
        size: u64,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path,
            content_hash,
            size,
            modified_at,
        }
    }

    /// Returns the relative path
    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    /// Returns the content hash
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Returns the size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the modification time
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }
}

/// Paths classified by one detection pass
///
/// Each list is kept in lexicographic order and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    added: Vec<RelativePath>,
    modified: Vec<RelativePath>,
    deleted: Vec<RelativePath>,
}

impl ChangeSet {
    /// Builds a ChangeSet, sorting and deduplicating each list
    pub fn new(
        mut added: Vec<RelativePath>,
        mut modified: Vec<RelativePath>,
        mut deleted: Vec<RelativePath>,
    ) -> Self {
        for list in [&mut added, &mut modified, &mut deleted] {
            list.sort();
            list.dedup();
        }
        Self {
            added,
            modified,
            deleted,
        }
    }

    /// Paths with no prior hash
    pub fn added(&self) -> &[RelativePath] {
        &self.added
    }

    /// Paths whose hash changed
    pub fn modified(&self) -> &[RelativePath] {
        &self.modified
    }

    /// Paths with a prior hash that were not observed
    pub fn deleted(&self) -> &[RelativePath] {
        &self.deleted
    }

    /// `added ∪ modified`, in lexicographic order
    pub fn files_to_sync(&self) -> Vec<RelativePath> {
        let mut files: Vec<RelativePath> = self
            .added
            .iter()
            .chain(self.modified.iter())
            .cloned()
            .collect();
        files.sort();
        files
    }

    /// Returns true if nothing changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of classified paths
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[test]
    fn test_change_set_sorted_and_deduplicated() {
        let set = ChangeSet::new(vec![p("b"), p("a"), p("b")], vec![], vec![p("z"), p("c")]);
        assert_eq!(set.added(), &[p("a"), p("b")]);
        assert_eq!(set.deleted(), &[p("c"), p("z")]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_files_to_sync_merges_in_order() {
        let set = ChangeSet::new(vec![p("c"), p("a")], vec![p("b")], vec![p("d")]);
        assert_eq!(set.files_to_sync(), vec![p("a"), p("b"), p("c")]);
    }

    #[test]
    fn test_empty() {
        assert!(ChangeSet::default().is_empty());
        assert!(!ChangeSet::new(vec![], vec![], vec![p("x")]).is_empty());
    }

    #[test]
    fn test_file_record_accessors() {
        let now = Utc::now();
        let record = FileRecord::new(p("a.txt"), ContentHash::empty(), 0, now);
        assert_eq!(record.path().as_str(), "a.txt");
        assert_eq!(record.size(), 0);
        assert_eq!(record.modified_at(), now);
        assert_eq!(record.content_hash().as_str(), ContentHash::EMPTY);
    }
}
