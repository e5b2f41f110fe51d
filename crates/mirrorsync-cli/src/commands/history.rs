//! History command - Show past sync sessions from the metadata snapshot

use anyhow::Result;
use clap::Args;
use tracing::debug;

use mirrorsync_core::config::Config;
use mirrorsync_core::domain::SyncSession;
use mirrorsync_core::ports::IMetadataStore;
use mirrorsync_sync::metadata::JsonMetadataStore;

use crate::output::{format_bytes, OutputFormat};

#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Number of most recent sessions to show
    #[arg(long, short = 'n', default_value_t = 10)]
    pub limit: usize,
}

impl HistoryCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();
        let store = JsonMetadataStore::from(&config.metadata);
        debug!(path = %store.path().display(), "Reading sync history");

        let metadata = store.load().await;
        let sessions = most_recent(&metadata.sync_history, self.limit);

        if format.is_json() {
            formatter.print_json(&serde_json::to_value(sessions)?);
            return Ok(());
        }

        if sessions.is_empty() {
            formatter.info("No sync sessions recorded yet");
            return Ok(());
        }

        formatter.success(&format!(
            "Last {} of {} sessions",
            sessions.len(),
            metadata.sync_history.len()
        ));
        for session in sessions {
            formatter.info(&summary_line(session));
        }
        Ok(())
    }
}

/// The last `limit` sessions, oldest first
fn most_recent(history: &[SyncSession], limit: usize) -> &[SyncSession] {
    &history[history.len().saturating_sub(limit)..]
}

fn summary_line(session: &SyncSession) -> String {
    let mut line = format!(
        "{}  {:<11}  {:>4} files  {:>10}  {} => {}",
        session.start_time().format("%Y-%m-%d %H:%M:%S"),
        session.status().to_string(),
        session.files_processed(),
        format_bytes(session.transferred_bytes()),
        session.source().display(),
        session.destination().display(),
    );
    if !session.errors().is_empty() {
        line.push_str(&format!("  ({} errors)", session.errors().len()));
    }
    line
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn completed() -> SyncSession {
        let mut s = SyncSession::new("/src", "/dst", Utc::now());
        s.start(Utc::now()).unwrap();
        s.complete(Utc::now()).unwrap();
        s
    }

    #[test]
    fn test_most_recent() {
        let history: Vec<SyncSession> = (0..5).map(|_| completed()).collect();
        assert_eq!(most_recent(&history, 2), &history[3..]);
        assert_eq!(most_recent(&history, 10).len(), 5);
        assert!(most_recent(&history, 0).is_empty());
    }

    #[test]
    fn test_summary_line() {
        let line = summary_line(&completed());
        assert!(line.contains("completed"));
        assert!(line.contains("/src => /dst"));
        assert!(!line.contains("errors"));
    }

    #[tokio::test]
    async fn test_execute_without_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.metadata.path = dir.path().join("metadata.json");

        let cmd = HistoryCommand { limit: 5 };
        cmd.execute(&config, OutputFormat::Human).await.unwrap();
    }
}
