//! Configuration module for drivefs.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for drivefs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub file_system: FileSystemConfig,
    pub logging: LoggingConfig,
}

/// Remote polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between update checks while no push channel is active.
    pub fast_poll_interval_secs: u64,
    /// Seconds between update checks while push notifications are enabled.
    pub slow_poll_interval_secs: u64,
    /// Whether a push-notification channel is active at startup.
    pub push_notifications: bool,
}

/// Local content cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of cached content and scratch areas.
    pub cache_dir: PathBuf,
    /// Maximum size of cached content (in MiB).
    pub max_size_mb: u64,
    /// Disk space (in MiB) that must stay free on the cache volume.
    pub min_free_space_mb: u64,
}

/// Coordinator behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemConfig {
    /// Hide hosted documents from directory listings and local search.
    pub hide_hosted_documents: bool,
    /// Events buffered per lagging observer.
    pub event_capacity: usize,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
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
    /// Typically `$XDG_CONFIG_HOME/drivefs/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("drivefs")
            .join("config.yaml")
    }
}

impl SyncConfig {
    /// Polling interval without push notifications.
    pub fn fast_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fast_poll_interval_secs)
    }

    /// Polling interval with push notifications.
    pub fn slow_poll_interval(&self) -> Duration {
        Duration::from_secs(self.slow_poll_interval_secs)
    }
}

impl CacheConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb.saturating_mul(1024 * 1024)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fast_poll_interval_secs: 60,
            slow_poll_interval_secs: 300,
            push_notifications: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("drivefs"),
            max_size_mb: 10 * 1024,
            min_free_space_mb: 512,
        }
    }
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            hide_hosted_documents: false,
            event_capacity: 256,
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
    /// Dotted path to the offending field, e.g. `"sync.fast_poll_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.fast_poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.fast_poll_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.slow_poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.slow_poll_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.fast_poll_interval_secs > self.sync.slow_poll_interval_secs {
            errors.push(ValidationError {
                field: "sync.fast_poll_interval_secs".into(),
                message: format!(
                    "must not exceed slow_poll_interval_secs ({})",
                    self.sync.slow_poll_interval_secs
                ),
            });
        }

        // --- cache ---
        if self.cache.max_size_mb == 0 {
            errors.push(ValidationError {
                field: "cache.max_size_mb".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.cache.cache_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "cache.cache_dir".into(),
                message: "must not be empty".into(),
            });
        }

        // --- file_system ---
        if self.file_system.event_capacity == 0 {
            errors.push(ValidationError {
                field: "file_system.event_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
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
/// use drivefs_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .cache_dir(PathBuf::from("/var/cache/drivefs"))
///     .fast_poll_interval_secs(30)
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

    pub fn fast_poll_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.fast_poll_interval_secs = seconds;
        self
    }

    pub fn slow_poll_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.slow_poll_interval_secs = seconds;
        self
    }

    pub fn push_notifications(mut self, enabled: bool) -> Self {
        self.config.sync.push_notifications = enabled;
        self
    }

    // --- cache ---

    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.cache.cache_dir = dir;
        self
    }

    pub fn cache_max_size_mb(mut self, mb: u64) -> Self {
        self.config.cache.max_size_mb = mb;
        self
    }

    pub fn cache_min_free_space_mb(mut self, mb: u64) -> Self {
        self.config.cache.min_free_space_mb = mb;
        self
    }

    // --- file_system ---

    pub fn hide_hosted_documents(mut self, hide: bool) -> Self {
        self.config.file_system.hide_hosted_documents = hide;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.file_system.event_capacity = capacity;
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

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.fast_poll_interval_secs, 60);
        assert_eq!(cfg.sync.slow_poll_interval_secs, 300);
        assert!(!cfg.sync.push_notifications);
        assert_eq!(cfg.cache.max_size_mb, 10240);
        assert_eq!(cfg.cache.min_free_space_mb, 512);
        assert!(cfg.cache.cache_dir.ends_with("drivefs"));
        assert!(!cfg.file_system.hide_hosted_documents);
        assert_eq!(cfg.file_system.event_capacity, 256);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    #[test]
    fn durations_follow_seconds() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.fast_poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.sync.slow_poll_interval(), Duration::from_secs(300));
        assert_eq!(cfg.cache.max_size_bytes(), 10240 * 1024 * 1024);
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  fast_poll_interval_secs: 30
  slow_poll_interval_secs: 600
  push_notifications: true
cache:
  cache_dir: /tmp/drivefs-cache
  max_size_mb: 2048
  min_free_space_mb: 128
file_system:
  hide_hosted_documents: true
  event_capacity: 64
logging:
  level: debug
  json: true
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.fast_poll_interval_secs, 30);
        assert_eq!(cfg.sync.slow_poll_interval_secs, 600);
        assert!(cfg.sync.push_notifications);
        assert_eq!(cfg.cache.cache_dir, PathBuf::from("/tmp/drivefs-cache"));
        assert_eq!(cfg.cache.max_size_mb, 2048);
        assert_eq!(cfg.cache.min_free_space_mb, 128);
        assert!(cfg.file_system.hide_hosted_documents);
        assert_eq!(cfg.file_system.event_capacity, 64);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn load_partial_yaml_fills_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"sync:\n  push_notifications: true\n").unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert!(cfg.sync.push_notifications);
        assert_eq!(cfg.sync.fast_poll_interval_secs, 60);
        assert_eq!(cfg.file_system.event_capacity, 256);
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sync.fast_poll_interval_secs, 60);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_intervals() {
        let mut cfg = Config::default();
        cfg.sync.fast_poll_interval_secs = 0;
        cfg.sync.slow_poll_interval_secs = 0;
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "sync.fast_poll_interval_secs"));
        assert!(errors
            .iter()
            .any(|e| e.field == "sync.slow_poll_interval_secs"));
    }

    #[test]
    fn validate_catches_fast_slower_than_slow() {
        let cfg = ConfigBuilder::new()
            .fast_poll_interval_secs(600)
            .slow_poll_interval_secs(300)
            .build();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sync.fast_poll_interval_secs");
    }

    #[test]
    fn validate_catches_zero_cache_size_and_capacity() {
        let cfg = ConfigBuilder::new()
            .cache_max_size_mb(0)
            .event_capacity(0)
            .build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "cache.max_size_mb"));
        assert!(errors.iter().any(|e| e.field == "file_system.event_capacity"));
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let cfg = ConfigBuilder::new().logging_level("verbose").build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_accepts_all_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let cfg = ConfigBuilder::new().logging_level(*level).build();
            assert!(cfg.validate().is_empty(), "level {level} should be valid");
        }
    }

    // -- Builder --

    #[test]
    fn builder_overrides_fields() {
        let cfg = ConfigBuilder::new()
            .push_notifications(true)
            .cache_dir(PathBuf::from("/x"))
            .cache_min_free_space_mb(1)
            .hide_hosted_documents(true)
            .logging_json(true)
            .build();
        assert!(cfg.sync.push_notifications);
        assert_eq!(cfg.cache.cache_dir, PathBuf::from("/x"));
        assert_eq!(cfg.cache.min_free_space_mb, 1);
        assert!(cfg.file_system.hide_hosted_documents);
        assert!(cfg.logging.json);
    }

    #[test]
    fn builder_build_validated_fails_for_invalid_config() {
        let result = ConfigBuilder::new().fast_poll_interval_secs(0).build_validated();
        assert!(result.is_err());
        assert!(ConfigBuilder::new().build_validated().is_ok());
    }

    #[test]
    fn default_path_ends_with_config_yaml() {
        let path = Config::default_path();
        assert!(path.ends_with("drivefs/config.yaml"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "sync.fast_poll_interval_secs".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(
            err.to_string(),
            "sync.fast_poll_interval_secs: must be greater than 0"
        );
    }
}
