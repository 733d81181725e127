//! Store configuration via `exocore-store.toml`
//!
//! Every key is optional; a missing key takes the default documented in
//! `StoreConfig::default_toml()`.

use exocore_core::{Error, Result};
use exocore_durability::CommitMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name used by `write_default_if_missing` callers.
pub const CONFIG_FILE_NAME: &str = "exocore-store.toml";

/// Source of operation ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    /// Counter starting at 1
    Sequential,
    /// Counter seeded from the UTC clock in microseconds
    Clock,
}

/// Store configuration loaded from TOML.
///
/// # Example
///
/// ```toml
/// default_page_size = 50
/// max_page_size = 1000
/// id_source = "clock"
/// commit_mode = "manual"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Page size used when a query's paging count is 0.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Upper bound on a query's page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Operation id source: `"sequential"` or `"clock"`.
    #[serde(default = "default_id_source")]
    pub id_source: String,
    /// Log commit mode: `"immediate"` or `"manual"`.
    #[serde(default = "default_commit_mode")]
    pub commit_mode: String,
    /// Number of watch re-evaluation worker threads.
    #[serde(default = "default_watch_workers")]
    pub watch_workers: usize,
    /// Maximum number of queued watch re-evaluations.
    #[serde(default = "default_watch_queue_depth")]
    pub watch_queue_depth: usize,
    /// Replay compacted operations and compare with the compaction result.
    #[serde(default = "default_verify_compaction")]
    pub verify_compaction: bool,
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    1000
}

fn default_id_source() -> String {
    "sequential".to_string()
}

fn default_commit_mode() -> String {
    "immediate".to_string()
}

fn default_watch_workers() -> usize {
    1
}

fn default_watch_queue_depth() -> usize {
    1024
}

fn default_verify_compaction() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            id_source: default_id_source(),
            commit_mode: default_commit_mode(),
            watch_workers: default_watch_workers(),
            watch_queue_depth: default_watch_queue_depth(),
            verify_compaction: default_verify_compaction(),
        }
    }
}

impl StoreConfig {
    /// Parse the id source string.
    pub fn id_source(&self) -> Result<IdSource> {
        match self.id_source.as_str() {
            "sequential" => Ok(IdSource::Sequential),
            "clock" => Ok(IdSource::Clock),
            other => Err(Error::Config(format!(
                "Invalid id_source '{}'. Expected \"sequential\" or \"clock\".",
                other
            ))),
        }
    }

    /// Parse the commit mode string.
    pub fn commit_mode(&self) -> Result<CommitMode> {
        match self.commit_mode.as_str() {
            "immediate" => Ok(CommitMode::Immediate),
            "manual" => Ok(CommitMode::Manual),
            other => Err(Error::Config(format!(
                "Invalid commit_mode '{}'. Expected \"immediate\" or \"manual\".",
                other
            ))),
        }
    }

    /// Check every value.
    pub fn validate(&self) -> Result<()> {
        self.id_source()?;
        self.commit_mode()?;
        if self.default_page_size == 0 {
            return Err(Error::Config("default_page_size must be at least 1".to_string()));
        }
        if self.max_page_size < self.default_page_size {
            return Err(Error::Config(format!(
                "max_page_size ({}) is smaller than default_page_size ({})",
                self.max_page_size, self.default_page_size
            )));
        }
        if self.watch_workers == 0 {
            return Err(Error::Config("watch_workers must be at least 1".to_string()));
        }
        if self.watch_queue_depth == 0 {
            return Err(Error::Config("watch_queue_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Exocore store configuration
#
# Page size used when a query asks for 0 results (default: 50)
default_page_size = 50

# Largest page a query can request; larger counts are clamped (default: 1000)
max_page_size = 1000

# Operation id source: "sequential" (default) or "clock"
#   "sequential" = 1, 2, 3, ...
#   "clock"      = seeded from UTC microseconds, roughly time-ordered across restarts
id_source = "sequential"

# Commit mode: "immediate" (default) or "manual"
#   "immediate" = results report CHAIN as soon as a mutation is applied
#   "manual"    = results report PENDING until commit_through / commit_all
commit_mode = "immediate"

# Watch re-evaluation workers and queue bound (defaults: 1, 1024)
watch_workers = 1
watch_queue_depth = 1024

# Replay compacted operations and reject compactions whose result differs
verify_compaction = true
"#
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_parses_to_default() {
        let config = StoreConfig::from_toml_str(StoreConfig::default_toml()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = StoreConfig::from_toml_str("max_page_size = 200").unwrap();
        assert_eq!(config.max_page_size, 200);
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.id_source().unwrap(), IdSource::Sequential);
        assert_eq!(config.commit_mode().unwrap(), CommitMode::Immediate);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            StoreConfig::from_toml_str("id_source = \"random\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("commit_mode = \"later\""),
            Err(Error::Config(_))
        ));
        assert!(StoreConfig::from_toml_str("default_page_size = 0").is_err());
        assert!(StoreConfig::from_toml_str("default_page_size = 100\nmax_page_size = 10").is_err());
        assert!(StoreConfig::from_toml_str("watch_workers = 0").is_err());
        assert!(StoreConfig::from_toml_str("not toml [").is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap(), StoreConfig::default());

        std::fs::write(&path, "commit_mode = \"manual\"\n").unwrap();
        // existing file is left alone
        StoreConfig::write_default_if_missing(&path).unwrap();
        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.commit_mode().unwrap(), CommitMode::Manual);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = StoreConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
