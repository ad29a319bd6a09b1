//! Configuration types for weft.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level configuration (`weft.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Weaving configuration.
    #[serde(default)]
    pub weave: WeaveConfig,

    /// Rule catalog configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Per rule-file configurations, keyed by file name (e.g. `base.json`).
    #[serde(default)]
    pub rules: HashMap<String, RuleFileConfig>,
}

impl Config {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Checks if a rule file is enabled.
    #[must_use]
    pub fn is_rule_file_enabled(&self, file_name: &str) -> bool {
        self.rules
            .get(file_name)
            .map_or(true, |c| c.enabled.unwrap_or(true))
    }
}

/// Weave-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaveConfig {
    /// Directory for records, matched rules, woven sources and logs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Keep copies of woven sources under `<work_dir>/debug`.
    #[serde(default = "default_true")]
    pub keep_debug: bool,

    /// Directory holding vendored crates.
    #[serde(default = "default_vendor_dir")]
    pub vendor_dir: PathBuf,

    /// Vendor manifest; defaults to `<vendor_dir>/modules.txt`.
    #[serde(default)]
    pub vendor_manifest: Option<PathBuf>,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            keep_debug: true,
            vendor_dir: default_vendor_dir(),
            vendor_manifest: None,
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("target/weft")
}

fn default_vendor_dir() -> PathBuf {
    PathBuf::from("vendor")
}

fn default_true() -> bool {
    true
}

/// Catalog configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// User rule files or directories of rule files.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Bundled rule files to drop; `["all"]` keeps only `base.json`.
    #[serde(default)]
    pub disable: Vec<String>,
}

/// Per rule-file configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFileConfig {
    /// Whether this rule file is loaded.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Parse error in config file.
    #[error("Failed to parse config: {message}")]
    Parse {
        /// Parse error message.
        message: String,
    },
}
