//! CLI subcommands

pub mod config;
pub mod history;
pub mod resolve;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use mirrorsync_core::domain::normalize_root;

/// Resolves `path` against the current directory without touching the disk
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_root(path));
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(normalize_root(&cwd.join(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path_keeps_absolute() {
        assert_eq!(
            absolute_path(Path::new("/data/src")).unwrap(),
            PathBuf::from("/data/src")
        );
    }

    #[test]
    fn test_absolute_path_drops_dot_segments() {
        assert_eq!(
            absolute_path(Path::new("/data/./src/")).unwrap(),
            PathBuf::from("/data/src")
        );
    }

    #[test]
    fn test_absolute_path_joins_relative() {
        let resolved = absolute_path(Path::new("photos")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("photos"));
    }
}
