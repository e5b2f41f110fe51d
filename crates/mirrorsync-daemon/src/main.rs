//! MirrorSync Daemon - Interval trigger for configured sync pairs
//!
//! This binary runs as a long-lived user service and handles:
//! - Periodic incremental sync of every pair in `daemon.pairs`
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon builds one `SyncOrchestrator` and enters a loop driven by
//! `tokio::time::interval`. Each tick runs `auto_check` for every pair
//! that has no session in flight. The loop is controlled by a
//! `CancellationToken` that is triggered on receipt of SIGTERM or SIGINT;
//! running sessions are then cancelled and recorded as Failed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use mirrorsync_core::config::{Config, LoggingConfig, SyncPairConfig};
use mirrorsync_core::domain::normalize_root;
use mirrorsync_core::ports::SystemClock;
use mirrorsync_sync::filesystem::LocalFileSystemAdapter;
use mirrorsync_sync::metadata::JsonMetadataStore;
use mirrorsync_sync::{SyncError, SyncOrchestrator};

#[derive(Debug, Parser)]
#[command(name = "mirrorsyncd", version, about = "MirrorSync interval daemon")]
struct Args {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Runs the configured pairs on a fixed interval until shutdown
struct DaemonService {
    /// Application configuration loaded from YAML
    config: Config,
    /// Engine shared by every triggered session
    orchestrator: Arc<SyncOrchestrator>,
    /// Token for signalling graceful shutdown
    shutdown: CancellationToken,
}

/// Per-tick outcome counts
#[derive(Debug, Default, PartialEq, Eq)]
struct TickSummary {
    completed: usize,
    failed: usize,
    skipped: usize,
}

impl DaemonService {
    async fn new(config: Config, shutdown: CancellationToken) -> Self {
        let orchestrator = SyncOrchestrator::new(
            Arc::new(LocalFileSystemAdapter::new()),
            Arc::new(SystemClock),
            Arc::new(JsonMetadataStore::from(&config.metadata)),
            &config,
        )
        .await;

        Self {
            config,
            orchestrator: Arc::new(orchestrator),
            shutdown,
        }
    }

    /// Main loop; the first tick fires immediately
    async fn run(&self) -> Result<()> {
        let period = Duration::from_secs(self.config.daemon.check_interval_secs.max(1));
        if self.config.daemon.pairs.is_empty() {
            warn!("No sync pairs configured under daemon.pairs; waiting for shutdown");
        }
        info!(
            check_interval_secs = period.as_secs(),
            pairs = self.config.daemon.pairs.len(),
            "Starting check loop"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let tick = self.check_pairs();
            tokio::pin!(tick);
            let summary = tokio::select! {
                summary = &mut tick => summary,
                _ = self.shutdown.cancelled() => {
                    // sessions observe the cancellation and finish as Failed
                    self.orchestrator.shutdown();
                    tick.await
                }
            };
            info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "Check cycle finished"
            );
        }

        info!("Shutdown signal received");
        self.orchestrator.shutdown();
        Ok(())
    }

    /// Runs `auto_check` for every idle pair concurrently and waits for all
    async fn check_pairs(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        let busy = self.orchestrator.active_sessions();
        let mut tasks = JoinSet::new();

        for SyncPairConfig {
            source,
            destination,
        } in self.config.daemon.pairs.iter().cloned()
        {
            let (root, target) = (normalize_root(&source), normalize_root(&destination));
            if busy.iter().any(|s| s.source == root && s.destination == target)
            {
                debug!(source = %source.display(), "Pair still syncing, skipping tick");
                summary.skipped += 1;
                continue;
            }
            let orchestrator = Arc::clone(&self.orchestrator);
            tasks.spawn(async move {
                let result = orchestrator.auto_check(&source, &destination).await;
                (source, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, Ok(session))) => {
                    summary.completed += 1;
                    info!(
                        source = %source.display(),
                        session_id = %session.id(),
                        files = session.files_processed(),
                        deleted = session.files_deleted(),
                        errors = session.errors().len(),
                        "Pair synced"
                    );
                }
                Ok((source, Err(SyncError::AdmissionRejected { limit }))) => {
                    summary.skipped += 1;
                    warn!(source = %source.display(), limit, "All session slots busy");
                }
                Ok((source, Err(e))) => {
                    summary.failed += 1;
                    error!(source = %source.display(), error = %e, "Pair sync failed");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "Sync task panicked");
                }
            }
        }
        summary
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);
    init_tracing(&config.logging);

    info!(config_path = %config_path.display(), "MirrorSync daemon starting (mirrorsyncd)");
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(field = %e.field, "{}", e.message);
        }
        anyhow::bail!("invalid configuration at {}", config_path.display());
    }

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token).await;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("MirrorSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "MirrorSync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use mirrorsync_core::config::ConfigBuilder;
    use tempfile::TempDir;

    use super::*;

    fn config(meta: &TempDir, pairs: &[(PathBuf, PathBuf)]) -> Config {
        let mut builder = ConfigBuilder::new()
            .metadata_path(meta.path().join("metadata.json"))
            .retry_max_retries(0)
            .daemon_check_interval_secs(1);
        for (source, destination) in pairs {
            builder = builder.daemon_pair(source.clone(), destination.clone());
        }
        builder.build()
    }

    #[test]
    fn test_args_parse_config() {
        let args = Args::try_parse_from(["mirrorsyncd", "--config", "/etc/m.yaml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/m.yaml")));
    }

    #[tokio::test]
    async fn test_check_pairs_syncs_every_pair() {
        let meta = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), "A").unwrap();
        let missing = meta.path().join("missing");

        let cfg = config(
            &meta,
            &[
                (src.path().to_path_buf(), dst.path().join("one")),
                (missing, dst.path().join("two")),
            ],
        );
        let service = DaemonService::new(cfg, CancellationToken::new()).await;

        let summary = service.check_pairs().await;
        assert_eq!(
            summary,
            TickSummary {
                completed: 1,
                failed: 1,
                skipped: 0
            }
        );
        assert_eq!(
            std::fs::read_to_string(dst.path().join("one/a.txt")).unwrap(),
            "A"
        );
        assert_eq!(service.orchestrator.history(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let meta = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), "A").unwrap();

        let token = CancellationToken::new();
        let cfg = config(&meta, &[(src.path().to_path_buf(), dst.path().to_path_buf())]);
        let service = DaemonService::new(cfg, token.clone()).await;

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), service.run())
            .await
            .expect("daemon loop did not stop")
            .unwrap();
        canceller.await.unwrap();

        // first tick fires immediately
        assert!(dst.path().join("a.txt").exists());
    }
}
