//! Sync command - Mirror a source directory into a destination
//!
//! Provides the `mirrorsync sync` CLI command which:
//! 1. Builds a SyncOrchestrator over the local filesystem and JSON store
//! 2. Prints a live progress line from the event channel
//! 3. Cancels the session on Ctrl-C
//! 4. Prints a summary of the finished session

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mirrorsync_core::config::{AdmissionMode, Config, DeletionPolicy, SyncMode};
use mirrorsync_core::domain::{ConflictStrategy, SyncSession};
use mirrorsync_core::ports::{SyncEvent, SystemClock};
use mirrorsync_sync::filesystem::LocalFileSystemAdapter;
use mirrorsync_sync::metadata::JsonMetadataStore;
use mirrorsync_sync::{SyncError, SyncOptions, SyncOrchestrator};

use super::absolute_path;
use crate::output::{format_bytes, format_duration, plural, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Directory to mirror from
    pub source: PathBuf,

    /// Directory to mirror into (created if missing)
    pub destination: PathBuf,

    /// mirror or bidirectional (defaults to sync.mode)
    #[arg(long)]
    pub mode: Option<SyncMode>,

    /// Conflict strategy for every path: newer, larger, local or remote
    #[arg(long)]
    pub strategy: Option<ConflictStrategy>,

    /// Fail instead of waiting when every session slot is busy
    #[arg(long)]
    pub reject_when_busy: bool,

    /// Abort the session after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Delete destination files even if they changed since the last sync
    #[arg(long)]
    pub propagate_deletes: bool,
}

impl SyncCommand {
    fn options(&self, cancel: CancellationToken) -> SyncOptions {
        let mut options = SyncOptions::new().with_cancel(cancel);
        if let Some(mode) = self.mode {
            options = options.with_mode(mode);
        }
        if let Some(strategy) = self.strategy {
            options = options.with_strategy(strategy);
        }
        if self.reject_when_busy {
            options = options.with_admission(AdmissionMode::Reject);
        }
        if let Some(secs) = self.timeout {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        if self.propagate_deletes {
            options = options.with_deletion(DeletionPolicy::Propagate);
        }
        options
    }

    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter: Arc<dyn OutputFormatter> = Arc::from(format.formatter());

        let errors = config.validate();
        if !errors.is_empty() {
            for error in &errors {
                formatter.error(&format!("{} - {}", error.field, error.message));
            }
            anyhow::bail!("configuration has {}", plural(errors.len() as u64, "error"));
        }

        let source = absolute_path(&self.source)?;
        let destination = absolute_path(&self.destination)?;
        info!(
            source = %source.display(),
            destination = %destination.display(),
            metadata = %config.metadata.path.display(),
            "Starting sync"
        );

        let orchestrator = SyncOrchestrator::new(
            Arc::new(LocalFileSystemAdapter::new()),
            Arc::new(SystemClock),
            Arc::new(JsonMetadataStore::from(&config.metadata)),
            config,
        )
        .await;

        let progress = tokio::spawn(render_progress(
            orchestrator.subscribe(),
            Arc::clone(&formatter),
        ));

        let cancel = CancellationToken::new();
        let ctrl_c = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling sync");
                    cancel.cancel();
                }
            })
        };

        let result = orchestrator
            .perform_incremental_sync(&source, &destination, self.options(cancel))
            .await;
        ctrl_c.abort();
        drop(orchestrator);
        let _ = progress.await;

        match result {
            Ok(session) => {
                print_summary(&session, format, formatter.as_ref());
                Ok(())
            }
            Err(SyncError::SessionFailed { session, reason }) => {
                if format.is_json() {
                    formatter.print_json(&serde_json::to_value(&*session)?);
                } else {
                    formatter.error(&format!("Sync failed: {reason}"));
                    print_problems(&session, formatter.as_ref());
                }
                anyhow::bail!("sync session {} failed: {reason}", session.id())
            }
            Err(err) => {
                formatter.error(&err.to_string());
                Err(err.into())
            }
        }
    }
}

/// Renders events until the session completes or the orchestrator is dropped
async fn render_progress(
    mut events: tokio::sync::broadcast::Receiver<SyncEvent>,
    formatter: Arc<dyn OutputFormatter>,
) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::Progress { file, progress, .. }) => {
                formatter.progress(&format!("{progress:5.1}%  {file}"), false);
            }
            Ok(SyncEvent::ConflictResolved { resolution, .. }) => {
                formatter.progress(
                    &format!(
                        "conflict on {}: kept {} ({})",
                        resolution.file(),
                        resolution.winner(),
                        resolution.strategy()
                    ),
                    true,
                );
            }
            Ok(SyncEvent::Completed { .. }) => {
                formatter.progress("", true);
                return;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

fn print_summary(session: &SyncSession, format: OutputFormat, formatter: &dyn OutputFormatter) {
    if format.is_json() {
        match serde_json::to_value(session) {
            Ok(value) => formatter.print_json(&value),
            Err(e) => formatter.error(&format!("Failed to serialize session: {e}")),
        }
        return;
    }

    let changes = session.change_set();
    if changes.is_empty() {
        formatter.success("Already up to date");
    } else {
        let took = session
            .duration()
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        formatter.success(&format!("Sync completed in {took}"));
    }

    if !changes.added().is_empty() {
        formatter.info(&format!("Added:       {}", plural(changes.added().len() as u64, "file")));
    }
    if !changes.modified().is_empty() {
        formatter.info(&format!(
            "Modified:    {}",
            plural(changes.modified().len() as u64, "file")
        ));
    }
    if session.files_deleted() > 0 {
        formatter.info(&format!("Deleted:     {}", plural(session.files_deleted(), "file")));
    }
    if session.transferred_bytes() > 0 {
        formatter.info(&format!(
            "Transferred: {}",
            format_bytes(session.transferred_bytes())
        ));
    }
    for conflict in session.conflicts() {
        formatter.info(&format!(
            "Conflict:    {} kept {} ({})",
            conflict.file(),
            conflict.winner(),
            conflict.strategy()
        ));
    }
    print_problems(session, formatter);
}

fn print_problems(session: &SyncSession, formatter: &dyn OutputFormatter) {
    for warning in session.warnings() {
        formatter.warn(warning);
    }
    if !session.errors().is_empty() {
        formatter.error(&format!(
            "{} could not be synced:",
            plural(session.errors().len() as u64, "file")
        ));
        for err in session.errors() {
            formatter.info(&format!("  - {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> SyncCommand {
        SyncCommand {
            source: PathBuf::from("/src"),
            destination: PathBuf::from("/dst"),
            mode: None,
            strategy: None,
            reject_when_busy: false,
            timeout: None,
            propagate_deletes: false,
        }
    }

    #[tokio::test]
    async fn test_execute_mirrors_directory() {
        let meta = tempfile::TempDir::new().unwrap();
        let src = tempfile::TempDir::new().unwrap();
        let dst = tempfile::TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), "A").unwrap();

        let mut config = Config::default();
        config.metadata.path = meta.path().join("metadata.json");
        let cmd = SyncCommand {
            source: src.path().to_path_buf(),
            destination: dst.path().join("out"),
            ..command()
        };

        cmd.execute(&config, OutputFormat::Json).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dst.path().join("out/a.txt")).unwrap(),
            "A"
        );
        assert!(config.metadata.path.exists());
    }

    #[tokio::test]
    async fn test_execute_missing_source_fails() {
        let meta = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.metadata.path = meta.path().join("metadata.json");
        let cmd = SyncCommand {
            source: meta.path().join("does-not-exist"),
            destination: meta.path().join("out"),
            ..command()
        };

        assert!(cmd.execute(&config, OutputFormat::Json).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_config() {
        let meta = tempfile::TempDir::new().unwrap();
        let src = tempfile::TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), "A").unwrap();

        let mut config = Config::default();
        config.metadata.path = meta.path().join("metadata.json");
        config.sync.chunk_size_kb = u64::MAX;
        let cmd = SyncCommand {
            source: src.path().to_path_buf(),
            destination: meta.path().join("out"),
            ..command()
        };

        assert!(cmd.execute(&config, OutputFormat::Human).await.is_err());
        assert!(!meta.path().join("out").exists());
        assert!(!config.metadata.path.exists());
    }
}
