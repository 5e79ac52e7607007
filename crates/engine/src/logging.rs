//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level, so operators can
//! turn up a single module without editing `indexer.toml`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ledgerview_core::{IndexerError, IndexerResult};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(IndexerError::config(format!(
                "Invalid log format '{}'. Expected \"pretty\" or \"json\".",
                other
            ))),
        }
    }
}

/// `[logging]` configuration block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"info"` or `"ledgerview_engine=debug"`
    #[serde(default = "default_level")]
    pub level: String,
    /// `"pretty"` or `"json"`
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl LoggingConfig {
    /// Parse the format string
    pub fn log_format(&self) -> IndexerResult<LogFormat> {
        self.format.parse()
    }

    fn filter(&self) -> IndexerResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level).map_err(|e| {
                IndexerError::config(format!("Invalid log level '{}': {}", self.level, e))
            }),
        }
    }
}

/// Install the global tracing subscriber
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> IndexerResult<()> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match config.log_format()? {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
    Ok(())
}
