//! Configuration loaded from TOML.
//!
//! ```toml
//! [store]
//! key_prefix = "checkout_form"
//! saved_flash_ms = 1500
//! kv_path = ".checkout-store/kv"
//! file_root = ".checkout-store/native"
//! native = "auto"
//! max_value_bytes = 5242880
//!
//! [logging]
//! level = "info"
//! format = "text"
//! output = "stderr"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::key::DEFAULT_KEY_PREFIX;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Whether the native file tier is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeMode {
    /// Native when `file_root` exists or can be created.
    #[default]
    Auto,
    Always,
    Never,
}

/// Persistence settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Namespace prefix of form record keys.
    pub key_prefix: String,
    /// How long the save indicator shows `saved` before returning to idle.
    pub saved_flash_ms: u64,
    /// Directory of the durable KV tier.
    pub kv_path: PathBuf,
    /// Root directory of the native file tier.
    pub file_root: PathBuf,
    pub native: NativeMode,
    /// Largest value the KV tier accepts. Unlimited when unset.
    pub max_value_bytes: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            saved_flash_ms: 1500,
            kv_path: PathBuf::from(".checkout-store/kv"),
            file_root: PathBuf::from(".checkout-store/native"),
            native: NativeMode::Auto,
            max_value_bytes: None,
        }
    }
}

impl StoreConfig {
    pub fn saved_flash(&self) -> Duration {
        Duration::from_millis(self.saved_flash_ms)
    }

    /// Capability probe for the native file tier.
    pub fn is_native_runtime(&self) -> bool {
        match self.native {
            NativeMode::Always => true,
            NativeMode::Never => false,
            NativeMode::Auto => std::fs::create_dir_all(&self.file_root).is_ok(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings for binaries embedding the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. `"info"` or `"checkout_store=debug"`.
    pub level: String,
    pub format: LogFormat,
    /// `"stdout"`, `"stderr"`, or a file path to append to.
    pub output: String,
    pub color: bool,
    pub timestamps: bool,
    /// Include the event target in each line.
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: "stderr".to_string(),
            color: true,
            timestamps: true,
            target: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.store.key_prefix;
        if prefix.is_empty() || prefix.ends_with('_') {
            return Err(ConfigError::Invalid(format!(
                "store.key_prefix must be non-empty and not end with '_' (got '{}')",
                prefix
            )));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
