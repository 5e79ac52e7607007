//! Indexer configuration via `indexer.toml`
//!
//! On first start a commented default file is written into the data
//! directory. To change settings, edit the file and restart.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use ledgerview_core::{IndexerError, IndexerResult};
use ledgerview_storage::BackendConfig;

use crate::logging::LoggingConfig;

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "indexer.toml";

/// Reserved key in every `[submodules.<name>]` block.
pub const ENABLED_KEY: &str = "enabled";

/// Indexer configuration loaded from `indexer.toml`.
///
/// # Example
///
/// ```toml
/// enabled = true
/// retain_height = 1000
///
/// [backend]
/// engine = "redb"
///
/// [submodules.nft]
/// enabled = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Master switch; when false every block hook is skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Number of recent heights never pruned; 0 disables pruning
    #[serde(default)]
    pub retain_height: u64,
    /// Durable backend selection and tuning
    #[serde(default)]
    pub backend: BackendConfig,
    /// Log level and format
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Free-form per-submodule blocks
    #[serde(default)]
    pub submodules: BTreeMap<String, toml::Table>,
}

fn default_enabled() -> bool {
    true
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retain_height: 0,
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
            submodules: BTreeMap::new(),
        }
    }
}

impl IndexerConfig {
    /// In-memory backend and defaults everywhere else
    pub fn in_memory() -> Self {
        Self {
            backend: BackendConfig::memory(),
            ..Default::default()
        }
    }

    /// Check every field that can be checked without opening anything.
    pub fn validate(&self) -> IndexerResult<()> {
        self.backend.validate()?;
        self.logging.log_format()?;
        for (name, table) in &self.submodules {
            if let Some(value) = table.get(ENABLED_KEY) {
                if !value.is_bool() {
                    return Err(IndexerError::config(format!(
                        "submodules.{}.enabled must be a boolean",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Free-form block for `name`, empty if absent
    pub fn submodule_config(&self, name: &str) -> toml::Table {
        self.submodules.get(name).cloned().unwrap_or_default()
    }

    /// Whether submodule `name` is enabled (default `true`)
    pub fn submodule_enabled(&self, name: &str) -> bool {
        self.submodules
            .get(name)
            .and_then(|t| t.get(ENABLED_KEY))
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# ledgerview indexer configuration
#
# Master switch. When false, blocks are passed through without indexing.
enabled = true

# Number of most recent heights whose index data is never pruned.
# 0 disables pruning.
retain_height = 0

[backend]
# "redb" (default) or "memory"
engine = "redb"
# Database file, relative to the data directory
path = "indexer.redb"
# Clean entries kept by the write-behind cache
cache_capacity = 100000
# redb page cache size in bytes (64 MiB)
block_cache_bytes = 67108864

[logging]
# Default filter; RUST_LOG overrides it
level = "info"
# "pretty" or "json"
format = "pretty"

# Per-submodule settings. `enabled` is reserved; everything else is passed
# to the submodule untouched.
# [submodules.nft]
# enabled = false
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> IndexerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: IndexerConfig = toml::from_str(&content).map_err(|e| {
            IndexerError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> IndexerResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                IndexerError::config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> IndexerResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| IndexerError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            IndexerError::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_parses_to_default() {
        let config: IndexerConfig = toml::from_str(IndexerConfig::default_toml()).unwrap();
        assert_eq!(config, IndexerConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();

        let config = IndexerConfig::from_file(&path).unwrap();
        assert!(config.enabled);
        assert_eq!(config.retain_height, 0);
        assert_eq!(config.backend.engine, "redb");
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "retain_height = 10\n").unwrap();

        IndexerConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(IndexerConfig::from_file(&path).unwrap().retain_height, 10);
    }

    #[test]
    fn submodule_blocks() {
        let config: IndexerConfig = toml::from_str(
            r#"
[submodules.nft]
enabled = false
collections = ["punks"]

[submodules.tx]
page_limit = 50
"#,
        )
        .unwrap();
        assert!(!config.submodule_enabled("nft"));
        assert!(config.submodule_enabled("tx"));
        assert!(config.submodule_enabled("block"));
        assert_eq!(
            config.submodule_config("tx").get("page_limit").and_then(|v| v.as_integer()),
            Some(50)
        );
        assert!(config.submodule_config("pair").is_empty());
    }

    #[test]
    fn non_bool_enabled_rejected() {
        let config: IndexerConfig = toml::from_str("[submodules.tx]\nenabled = \"yes\"\n").unwrap();
        assert!(matches!(config.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn unknown_engine_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[backend]\nengine = \"leveldb\"\n").unwrap();
        assert!(IndexerConfig::from_file(&path).is_err());
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = IndexerConfig::in_memory();
        config.retain_height = 500;
        let mut nft = toml::Table::new();
        nft.insert("enabled".into(), toml::Value::Boolean(false));
        config.submodules.insert("nft".into(), nft);

        config.write_to_file(&path).unwrap();
        let loaded = IndexerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
