//! MirrorSync CLI - Command-line interface for MirrorSync
//!
//! Provides commands for:
//! - Running one incremental sync of a directory pair
//! - Viewing persisted sync history
//! - Previewing how a conflict between two files would be resolved
//! - Viewing, validating and creating the configuration file

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mirrorsync_core::config::{Config, LoggingConfig};

mod commands;
mod output;

use commands::{
    config::ConfigCommand, history::HistoryCommand, resolve::ResolveCommand, sync::SyncCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "mirrorsync", version, about = "Incremental directory mirroring")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Mirror a source directory into a destination
    Sync(SyncCommand),
    /// Show past sync sessions
    History(HistoryCommand),
    /// Show which of two file versions a strategy would keep
    Resolve(ResolveCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Sets up tracing; `RUST_LOG` wins, then `-v`, then the configured level
fn init_tracing(verbose: u8, logging: &LoggingConfig) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);
    init_tracing(cli.verbose, &config.logging);

    let format = OutputFormat::from_json_flag(cli.json);

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(&config, format).await,
        Commands::History(cmd) => cmd.execute(&config, format).await,
        Commands::Resolve(cmd) => cmd.execute(&config, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::try_parse_from([
            "mirrorsync",
            "--json",
            "-vv",
            "sync",
            "/a",
            "/b",
            "--mode",
            "bidirectional",
            "--strategy",
            "larger",
            "--timeout",
            "30",
            "--reject-when-busy",
            "--propagate-deletes",
        ])
        .unwrap();

        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Sync(cmd) => {
                assert_eq!(cmd.source, PathBuf::from("/a"));
                assert!(cmd.reject_when_busy);
                assert!(cmd.propagate_deletes);
                assert_eq!(cmd.timeout, Some(30));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_strategy() {
        let result = Cli::try_parse_from(["mirrorsync", "sync", "/a", "/b", "--strategy", "coin"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_config_subcommands() {
        let cli = Cli::try_parse_from(["mirrorsync", "--config", "/tmp/c.yaml", "config", "init"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert!(matches!(cli.command, Commands::Config(ConfigCommand::Init { force: false })));
    }
}
