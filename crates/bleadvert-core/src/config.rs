//! Application configuration management.
//!
//! Handles loading, saving, and validating bleadvert configuration including:
//! - RSSI to distance calibration and the sample window size
//! - Polling and dwell timer periods and thresholds
//! - Storage location and transaction retry policy
//! - Timezone used to render analytics timestamps
//!
//! Configuration is layered: a TOML file, then `BLEADVERT__SECTION__KEY`
//! environment overrides.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BLEADVERT";

/// Smallest accepted distance sample window.
pub const MIN_SAMPLE_WINDOW: usize = 6;

/// Largest accepted distance sample window.
pub const MAX_SAMPLE_WINDOW: usize = 8;

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address regex is valid")
});

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The configuration sources could not be merged or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("failed to write {path}: {source}")]
    WriteError {
        /// Target path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A single field holds an invalid value.
    #[error("invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// More than one field is invalid.
    #[error("{} configuration fields are invalid", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signal sampling and proximity polling.
    pub scanner: ScannerConfig,

    /// Dwell timer behaviour.
    pub dwell: DwellConfig,

    /// Persistence backends.
    pub storage: StorageConfig,

    /// System wide settings.
    pub system: SystemConfig,

    /// HTTP server settings.
    pub server: ServerConfig,
}

/// RSSI calibration and polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// RSSI measured at 1 m, in dBm.
    pub reference_rssi: f64,

    /// Path loss exponent (2.0 is free space).
    pub path_loss_exponent: f64,

    /// Number of distance samples averaged per beacon.
    pub sample_window: usize,

    /// Period of the closest-beacon polling loop.
    pub poll_interval_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            reference_rssi: -59.0,
            path_loss_exponent: 2.0,
            sample_window: 6,
            poll_interval_ms: 50,
        }
    }
}

/// Dwell accumulation and scan thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    /// Period of the dwell timer task.
    pub tick_interval_ms: u64,

    /// Continuous dwell needed before a scan is recorded.
    pub scan_threshold_ms: u64,

    /// Shortest visit worth reporting to the visit ledger.
    pub min_reportable_ms: u64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            scan_threshold_ms: 5000,
            min_reportable_ms: 5000,
        }
    }
}

/// Storage location and transaction policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for JSON documents. Platform default when unset.
    pub data_dir: Option<PathBuf>,

    /// Attempts made by a transaction before a conflict is surfaced.
    pub transaction_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            transaction_attempts: 5,
        }
    }
}

impl StorageConfig {
    /// The configured data directory or the platform default.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(crate::storage::default_data_dir)
    }
}

/// System wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// IANA timezone used when rendering first-visit timestamps.
    pub timezone: String,

    /// Beacon and event catalog. Defaults to `<data_dir>/catalog.json`.
    pub catalog_path: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            catalog_path: None,
        }
    }
}

impl SystemConfig {
    /// Parsed timezone, falling back to UTC.
    #[must_use]
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the API binds to.
    pub bind_address: String,

    /// Whether to use production logging.
    pub production: bool,

    /// Directory for rolling log files in production; platform default when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            production: false,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from `path` with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a parse or
    /// validation error.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::build(path)
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist. Environment overrides still apply.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
        }
        Self::build(path)
    }

    fn build(path: &Path) -> ConfigResult<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)?;
        Ok(())
    }

    /// Validate all fields, collecting every problem.
    ///
    /// # Errors
    ///
    /// Returns the single failing field, or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !(-100.0..=0.0).contains(&self.scanner.reference_rssi) {
            errors.push(ConfigError::ValidationError {
                field: "scanner.reference_rssi",
                message: "must be between -100 and 0 dBm".to_string(),
            });
        }
        if !(self.scanner.path_loss_exponent.is_finite() && self.scanner.path_loss_exponent > 0.0) {
            errors.push(ConfigError::ValidationError {
                field: "scanner.path_loss_exponent",
                message: "must be a positive number".to_string(),
            });
        }
        if !(MIN_SAMPLE_WINDOW..=MAX_SAMPLE_WINDOW).contains(&self.scanner.sample_window) {
            errors.push(ConfigError::ValidationError {
                field: "scanner.sample_window",
                message: format!("must be between {MIN_SAMPLE_WINDOW} and {MAX_SAMPLE_WINDOW}"),
            });
        }
        if self.scanner.poll_interval_ms == 0 {
            errors.push(ConfigError::ValidationError {
                field: "scanner.poll_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.dwell.tick_interval_ms == 0 {
            errors.push(ConfigError::ValidationError {
                field: "dwell.tick_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.dwell.scan_threshold_ms < self.dwell.tick_interval_ms {
            errors.push(ConfigError::ValidationError {
                field: "dwell.scan_threshold_ms",
                message: "must be at least one dwell tick".to_string(),
            });
        }
        if self.storage.transaction_attempts == 0 {
            errors.push(ConfigError::ValidationError {
                field: "storage.transaction_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if !is_valid_timezone_format(&self.system.timezone) {
            errors.push(ConfigError::ValidationError {
                field: "system.timezone",
                message: format!("unknown IANA timezone '{}'", self.system.timezone),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Catalog path, resolved against the data directory when unset.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.system
            .catalog_path
            .clone()
            .unwrap_or_else(|| self.storage.resolved_data_dir().join("catalog.json"))
    }
}

/// Default location of the configuration file.
///
/// On Linux: `/etc/bleadvert/config.toml`
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/bleadvert/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bleadvert").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

/// Whether `address` looks like `XX:XX:XX:XX:XX:XX`.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Whether `timezone` is a known IANA name.
#[must_use]
pub fn is_valid_timezone_format(timezone: &str) -> bool {
    timezone.parse::<Tz>().is_ok()
}
