//! Resolve command - Preview a conflict resolution between two files
//!
//! Stats and hashes both files and reports which version the configured
//! (or given) strategy would keep. Nothing on disk is changed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use mirrorsync_conflict::{ConflictResolver, PolicyEngine};
use mirrorsync_core::config::Config;
use mirrorsync_core::domain::{ConflictResolution, ConflictStrategy, RelativePath, VersionInfo};
use mirrorsync_core::ports::IFileSystem;
use mirrorsync_sync::filesystem::LocalFileSystemAdapter;

use super::absolute_path;
use crate::output::{format_bytes, OutputFormat};

#[derive(Debug, Args)]
pub struct ResolveCommand {
    /// Source-side version of the file
    pub local: PathBuf,

    /// Destination-side version of the file
    pub remote: PathBuf,

    /// Strategy to apply instead of the configured rules
    #[arg(long)]
    pub strategy: Option<ConflictStrategy>,
}

/// Outcome of comparing the two versions
enum Preview {
    Identical,
    Resolved(ConflictResolution),
}

impl ResolveCommand {
    async fn preview(&self, config: &Config) -> Result<Preview> {
        let fs = LocalFileSystemAdapter::new();
        let local_path = absolute_path(&self.local)?;
        let remote_path = absolute_path(&self.remote)?;

        let local = version_of(&fs, &local_path).await?;
        let remote = version_of(&fs, &remote_path).await?;
        if local.hash() == remote.hash() {
            return Ok(Preview::Identical);
        }

        // rules match on the file name, as they would inside a sync root
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("local path has no file name")?;
        let file = RelativePath::new(name)?;

        let resolver = ConflictResolver::new(PolicyEngine::from(&config.conflicts));
        Ok(Preview::Resolved(resolver.resolve(
            file,
            local,
            remote,
            self.strategy,
            Utc::now(),
        )))
    }

    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();

        let resolution = match self.preview(config).await? {
            Preview::Identical => {
                if format.is_json() {
                    formatter.print_json(&serde_json::json!({ "identical": true }));
                } else {
                    formatter.success("Files are identical, nothing to resolve");
                }
                return Ok(());
            }
            Preview::Resolved(resolution) => resolution,
        };

        if format.is_json() {
            formatter.print_json(&serde_json::to_value(&resolution)?);
            return Ok(());
        }

        let (kept, path) = match resolution.winner() {
            mirrorsync_core::domain::Winner::Local => ("local", &self.local),
            mirrorsync_core::domain::Winner::Remote => ("remote", &self.remote),
        };
        formatter.success(&format!(
            "Strategy '{}' keeps the {kept} version ({})",
            resolution.strategy(),
            path.display()
        ));
        for (label, version) in [
            ("local ", resolution.local_version()),
            ("remote", resolution.remote_version()),
        ] {
            formatter.info(&format!(
                "{label}  {:>10}  modified {}  {}",
                format_bytes(version.size()),
                version.modified_at().format("%Y-%m-%d %H:%M:%S"),
                version.hash().map(|h| h.short()).unwrap_or("-"),
            ));
        }
        Ok(())
    }
}

async fn version_of(fs: &LocalFileSystemAdapter, path: &Path) -> Result<VersionInfo> {
    let state = fs.stat(path).await?;
    if !state.is_regular_file() {
        anyhow::bail!("{} is not a regular file", path.display());
    }
    let hash = fs.compute_hash(path).await?;
    Ok(VersionInfo::new(state.size, state.modified.unwrap_or_default()).with_hash(hash))
}

#[cfg(test)]
mod tests {
    use mirrorsync_core::domain::Winner;

    use super::*;

    fn command(dir: &tempfile::TempDir, strategy: Option<ConflictStrategy>) -> ResolveCommand {
        ResolveCommand {
            local: dir.path().join("local.txt"),
            remote: dir.path().join("remote.txt"),
            strategy,
        }
    }

    #[tokio::test]
    async fn test_larger_keeps_bigger_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("local.txt"), "short").unwrap();
        std::fs::write(dir.path().join("remote.txt"), "much longer content").unwrap();

        let cmd = command(&dir, Some(ConflictStrategy::Larger));
        match cmd.preview(&Config::default()).await.unwrap() {
            Preview::Resolved(r) => {
                assert_eq!(r.winner(), Winner::Remote);
                assert_eq!(r.file().as_str(), "local.txt");
            }
            Preview::Identical => panic!("files differ"),
        }
    }

    #[tokio::test]
    async fn test_configured_rule_applies() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("local.txt"), "a much longer local").unwrap();
        std::fs::write(dir.path().join("remote.txt"), "r").unwrap();
        let mut config = Config::default();
        config.conflicts.rules.push(mirrorsync_core::config::ConflictRuleConfig {
            pattern: "*.txt".to_string(),
            strategy: ConflictStrategy::Remote,
        });

        let cmd = command(&dir, None);
        match cmd.preview(&config).await.unwrap() {
            Preview::Resolved(r) => assert_eq!(r.winner(), Winner::Remote),
            Preview::Identical => panic!("files differ"),
        }
    }

    #[tokio::test]
    async fn test_identical_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("local.txt"), "same").unwrap();
        std::fs::write(dir.path().join("remote.txt"), "same").unwrap();

        let cmd = command(&dir, None);
        assert!(matches!(
            cmd.preview(&Config::default()).await.unwrap(),
            Preview::Identical
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("local.txt"), "x").unwrap();

        let cmd = command(&dir, None);
        assert!(cmd.preview(&Config::default()).await.is_err());
    }
}
