//! Configuration module for MirrorSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ConflictStrategy, DomainError};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for MirrorSync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub metadata: MetadataConfig,
    pub retry: RetryConfig,
    pub conflicts: ConflictsConfig,
    pub daemon: DaemonConfig,
    pub logging: LoggingConfig,
}

/// What happens to a request that arrives while every session slot is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Wait in FIFO order for a slot.
    #[default]
    Queue,
    /// Fail immediately with `AdmissionRejected`.
    Reject,
}

/// How deletions in the source are applied to the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Keep destination files that changed since the last sync.
    #[default]
    SkipModified,
    /// Delete unconditionally.
    Propagate,
}

/// Direction semantics of a sync pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Source always overwrites destination; the resolver is never used.
    #[default]
    Mirror,
    /// Destination edits since the last sync go through the conflict resolver.
    Bidirectional,
}

macro_rules! impl_str_enum {
    ($ty:ty, $($variant:path => $name:literal),+ $(,)?) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let s = match self {
                    $($variant => $name),+
                };
                write!(f, "{}", s)
            }
        }

        impl FromStr for $ty {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(DomainError::ValidationFailed(format!(
                        "invalid value '{}'; valid options: {}",
                        other,
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }
    };
}

impl_str_enum!(AdmissionMode, AdmissionMode::Queue => "queue", AdmissionMode::Reject => "reject");
impl_str_enum!(
    DeletionPolicy,
    DeletionPolicy::SkipModified => "skip_modified",
    DeletionPolicy::Propagate => "propagate",
);
impl_str_enum!(SyncMode, SyncMode::Mirror => "mirror", SyncMode::Bidirectional => "bidirectional");

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum sessions InProgress at once.
    pub max_concurrent_sync: usize,
    /// Transfer chunk size (in KiB).
    pub chunk_size_kb: u64,
    /// Maximum file transfers in flight across all sessions.
    pub max_inflight_transfers: usize,
    /// Per-session deadline in seconds; 0 disables it.
    pub session_timeout_secs: u64,
    pub admission: AdmissionMode,
    pub deletion: DeletionPolicy,
    pub mode: SyncMode,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl SyncConfig {
    /// Chunk size in bytes.
    pub fn chunk_size_bytes(&self) -> usize {
        (self.chunk_size_kb.clamp(1, MAX_CHUNK_SIZE_KB) as usize) * 1024
    }

    /// Session deadline, if one is configured.
    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_secs > 0).then(|| Duration::from_secs(self.session_timeout_secs))
    }
}

/// Metadata store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Location of the JSON snapshot.
    pub path: PathBuf,
    /// Number of finished sessions kept in history.
    pub history_limit: usize,
}

/// Retry settings for transient transfer failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first; 0 disables retries.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// A path pattern mapped to a conflict strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRuleConfig {
    /// Glob pattern matched against the relative path.
    pub pattern: String,
    pub strategy: ConflictStrategy,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Strategy used when no rule matches.
    pub default_strategy: ConflictStrategy,
    /// Ordered rules; the first match wins.
    pub rules: Vec<ConflictRuleConfig>,
}

/// A configured source/destination pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPairConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Interval trigger settings for `mirrorsyncd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between automatic checks.
    pub check_interval_secs: u64,
    pub pairs: Vec<SyncPairConfig>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/mirrorsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("mirrorsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sync: 3,
            chunk_size_kb: 5 * 1024,
            max_inflight_transfers: 4,
            session_timeout_secs: 0,
            admission: AdmissionMode::default(),
            deletion: DeletionPolicy::default(),
            mode: SyncMode::default(),
            event_buffer: 256,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("mirrorsync");
        Self {
            path: data_dir.join("metadata.json"),
            history_limit: 100,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            pairs: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.chunk_size_kb"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Upper bound for `sync.chunk_size_kb` (1 GiB).
pub const MAX_CHUNK_SIZE_KB: u64 = 1024 * 1024;

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        positive(&mut errors, "sync.max_concurrent_sync", self.sync.max_concurrent_sync as u64);
        positive(&mut errors, "sync.chunk_size_kb", self.sync.chunk_size_kb);
        if self.sync.chunk_size_kb > MAX_CHUNK_SIZE_KB {
            errors.push(ValidationError {
                field: "sync.chunk_size_kb".into(),
                message: format!("must not exceed {MAX_CHUNK_SIZE_KB} (1 GiB)"),
            });
        }
        positive(
            &mut errors,
            "sync.max_inflight_transfers",
            self.sync.max_inflight_transfers as u64,
        );
        positive(&mut errors, "sync.event_buffer", self.sync.event_buffer as u64);

        // --- metadata ---
        positive(&mut errors, "metadata.history_limit", self.metadata.history_limit as u64);
        if self.metadata.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "metadata.path".into(),
                message: "must not be empty".into(),
            });
        }

        // --- retry ---
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push(ValidationError {
                field: "retry.base_delay_ms".into(),
                message: format!(
                    "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                    self.retry.base_delay_ms, self.retry.max_delay_ms
                ),
            });
        }

        // --- conflicts ---
        for (i, rule) in self.conflicts.rules.iter().enumerate() {
            if let Err(e) = glob::Pattern::new(&rule.pattern) {
                errors.push(ValidationError {
                    field: format!("conflicts.rules[{i}].pattern"),
                    message: format!("invalid glob '{}': {}", rule.pattern, e),
                });
            }
        }

        // --- daemon ---
        positive(&mut errors, "daemon.check_interval_secs", self.daemon.check_interval_secs);
        for (i, pair) in self.daemon.pairs.iter().enumerate() {
            if pair.source.starts_with(&pair.destination) || pair.destination.starts_with(&pair.source)
            {
                errors.push(ValidationError {
                    field: format!("daemon.pairs[{i}]"),
                    message: format!(
                        "source {} and destination {} must not contain each other",
                        pair.source.display(),
                        pair.destination.display()
                    ),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use mirrorsync_core::config::{ConfigBuilder, SyncMode};
///
/// let config = ConfigBuilder::new()
///     .sync_max_concurrent_sync(2)
///     .sync_mode(SyncMode::Bidirectional)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_max_concurrent_sync(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_sync = n;
        self
    }

    pub fn sync_chunk_size_kb(mut self, kb: u64) -> Self {
        self.config.sync.chunk_size_kb = kb;
        self
    }

    pub fn sync_max_inflight_transfers(mut self, n: usize) -> Self {
        self.config.sync.max_inflight_transfers = n;
        self
    }

    pub fn sync_session_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.session_timeout_secs = seconds;
        self
    }

    pub fn sync_admission(mut self, admission: AdmissionMode) -> Self {
        self.config.sync.admission = admission;
        self
    }

    pub fn sync_deletion(mut self, deletion: DeletionPolicy) -> Self {
        self.config.sync.deletion = deletion;
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.config.sync.mode = mode;
        self
    }

    // --- metadata ---

    pub fn metadata_path(mut self, path: PathBuf) -> Self {
        self.config.metadata.path = path;
        self
    }

    pub fn metadata_history_limit(mut self, limit: usize) -> Self {
        self.config.metadata.history_limit = limit;
        self
    }

    // --- retry ---

    pub fn retry_max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_delays_ms(mut self, base: u64, max: u64) -> Self {
        self.config.retry.base_delay_ms = base;
        self.config.retry.max_delay_ms = max;
        self
    }

    // --- conflicts ---

    pub fn conflicts_default_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.config.conflicts.default_strategy = strategy;
        self
    }

    pub fn conflicts_rule(mut self, pattern: impl Into<String>, strategy: ConflictStrategy) -> Self {
        self.config.conflicts.rules.push(ConflictRuleConfig {
            pattern: pattern.into(),
            strategy,
        });
        self
    }

    // --- daemon ---

    pub fn daemon_check_interval_secs(mut self, seconds: u64) -> Self {
        self.config.daemon.check_interval_secs = seconds;
        self
    }

    pub fn daemon_pair(mut self, source: PathBuf, destination: PathBuf) -> Self {
        self.config
            .daemon
            .pairs
            .push(SyncPairConfig { source, destination });
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
