//! Config command - View and manage MirrorSync configuration
//!
//! Provides the `mirrorsync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration file and reports errors
//! 3. Writes a default configuration file

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use mirrorsync_core::config::Config;

use crate::output::{plural, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Validate configuration file
    Validate,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(config_path, format),
            ConfigCommand::Validate => execute_validate(config_path, format),
            ConfigCommand::Init { force } => execute_init(config_path, *force, format),
        }
    }
}

fn execute_show(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = format.formatter();
    let config = Config::load_or_default(config_path);

    info!(config_path = %config_path.display(), "Showing configuration");

    if format.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    let origin = if config_path.exists() {
        config_path.display().to_string()
    } else {
        format!("defaults, {} not found", config_path.display())
    };
    formatter.success(&format!("Configuration ({origin})"));
    formatter.info("");

    let yaml =
        serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_validate(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = format.formatter();

    // load explicitly so parse errors surface instead of falling back to defaults
    let config = match Config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) if !config_path.exists() => {
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": ["Configuration file not found"],
                }));
            } else {
                formatter.info(&format!(
                    "Configuration file not found at {}",
                    config_path.display()
                ));
                formatter.info("Run 'mirrorsync config init' to create one.");
            }
            return Err(e).context("configuration file not found");
        }
        Err(e) => {
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": [format!("Failed to parse configuration: {e}")],
                }));
            } else {
                formatter.error(&format!("Failed to parse configuration: {e}"));
                formatter.info(&format!("File: {}", config_path.display()));
            }
            return Err(e).context("invalid configuration file");
        }
    };

    info!(config_path = %config_path.display(), "Validating configuration");
    let errors = config.validate();

    if format.is_json() {
        let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": error_strings,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {}:",
            plural(errors.len() as u64, "error")
        ));
        formatter.info(&format!("File: {}", config_path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("configuration has {}", plural(errors.len() as u64, "error"));
    }
    Ok(())
}

fn execute_init(config_path: &Path, force: bool, format: OutputFormat) -> Result<()> {
    let formatter = format.formatter();

    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml =
        serde_yaml::to_string(&Config::default()).context("Failed to serialize configuration")?;
    std::fs::write(config_path, yaml).context("Failed to write configuration file")?;

    info!(config_path = %config_path.display(), "Wrote default configuration");

    if format.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "config_path": config_path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Wrote {}", config_path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_then_validate() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/config.yaml");

        ConfigCommand::Init { force: false }
            .execute(&path, OutputFormat::Json)
            .await
            .unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        ConfigCommand::Validate
            .execute(&path, OutputFormat::Json)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "logging:\n  level: debug\n").unwrap();

        let result = ConfigCommand::Init { force: false }
            .execute(&path, OutputFormat::Human)
            .await;
        assert!(result.is_err());
        assert!(std::fs::read_to_string(&path).unwrap().contains("debug"));

        ConfigCommand::Init { force: true }
            .execute(&path, OutputFormat::Human)
            .await
            .unwrap();
        assert_eq!(Config::load(&path).unwrap().logging.level, "info");
    }

    #[tokio::test]
    async fn test_validate_reports_invalid_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "sync:\n  chunk_size_kb: 0\n").unwrap();

        let result = ConfigCommand::Validate
            .execute(&path, OutputFormat::Human)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_validate_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = ConfigCommand::Validate
            .execute(&dir.path().join("absent.yaml"), OutputFormat::Json)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_show_without_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        ConfigCommand::Show
            .execute(&dir.path().join("absent.yaml"), OutputFormat::Human)
            .await
            .unwrap();
    }
}
