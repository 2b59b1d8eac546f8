//! Persistence-unit configuration.
//!
//! A configuration document lists named persistence units. Each unit names
//! the database to open, an optional dialect the driver must speak, and the
//! log level used when the facade bootstraps logging.
//!
//! ```json
//! {
//!   "units": [
//!     { "name": "shop", "url": "shop.db", "dialect": "sqlite", "log_level": "info" }
//!   ]
//! }
//! ```

use crate::dialect::SqlDialect;
use crate::error::{ConfigError, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

fn default_log_level() -> String {
    "debug".to_string()
}

const fn default_busy_timeout_ms() -> u32 {
    5000
}

/// One named database target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceUnit {
    /// Unit name, used to select it from a configuration document.
    #[serde(default)]
    pub name: String,
    /// Database path or URL; `:memory:` opens a private in-memory database.
    #[serde(default)]
    pub url: String,
    /// Dialect the driver is expected to speak, if declared.
    #[serde(default)]
    pub dialect: Option<SqlDialect>,
    /// Logging filter applied by `unitwork::logging`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long a locked database is retried before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
}

impl PersistenceUnit {
    /// A unit with default settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            dialect: None,
            log_level: default_log_level(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    /// Declare the expected dialect.
    #[must_use]
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Check required fields and known values.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("Persistence unit name was not provided"));
        }
        if self.url.trim().is_empty() {
            return Err(Error::config(format!(
                "Url was not provided for persistence unit '{}'",
                self.name
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(Error::config(format!(
                "Unknown log level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Fail unless the declared dialect, if any, is `actual`.
    pub fn check_dialect(&self, actual: SqlDialect) -> Result<()> {
        match self.dialect {
            Some(declared) if declared != actual => Err(Error::config(
                "The specified dialect does not match the dialect of the driver",
            )),
            _ => Ok(()),
        }
    }
}

/// A configuration document holding persistence units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub units: Vec<PersistenceUnit>,
}

impl PersistenceConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("Invalid persistence configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
        for unit in &config.units {
            unit.validate()?;
        }
        Ok(config)
    }

    /// Read, parse and validate a JSON document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("Cannot read persistence configuration {}", path.display()),
                source: Some(Box::new(e)),
            })
        })?;
        tracing::debug!(path = %path.display(), "Loaded persistence configuration");
        Self::from_json_str(&text)
    }

    /// Look up a unit by name.
    pub fn unit(&self, name: &str) -> Result<&PersistenceUnit> {
        self.units
            .iter()
            .find(|u| u.name == name)
            .ok_or_else(|| Error::config(format!("Persistence unit '{}' was not found", name)))
    }
}
