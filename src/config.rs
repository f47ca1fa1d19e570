//! Engine configuration.
//!
//! Every field has a default, so an absent or partial `config.toml` is
//! valid. The file lives inside the state directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const CONFIG_FILENAME: &str = "config.toml";

/// Directories never descended into when scanning a project.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".code-index",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "vendor",
    "__pycache__",
    ".venv",
    ".next",
    "coverage",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Project-local directory holding both database files
    pub state_dir: PathBuf,
    pub index_file: String,
    pub cache_file: String,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    /// Paths per transaction in `bulk_update`
    pub bulk_batch_size: usize,
    pub excluded_dirs: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".code-index"),
            index_file: "index.db".to_string(),
            cache_file: "cache.db".to_string(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            bulk_batch_size: 100,
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at the given state directory.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Loads `<state_dir>/config.toml` if it exists, falling back to defaults.
    /// The returned config always points at `state_dir`.
    pub fn load(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        let path = state_dir.join(CONFIG_FILENAME);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<EngineConfig>(&raw)
                .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            EngineConfig::default()
        };
        config.state_dir = state_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bulk_batch_size == 0 {
            return Err(EngineError::Config("bulk_batch_size must be > 0".into()));
        }
        if self.storage.pool_size == 0 || self.cache.storage.pool_size == 0 {
            return Err(EngineError::Config("pool_size must be > 0".into()));
        }
        if self.cache.maintenance_interval_ms == 0 {
            return Err(EngineError::Config(
                "maintenance_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn index_path(&self) -> PathBuf {
        self.state_dir.join(&self.index_file)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.state_dir.join(&self.cache_file)
    }
}

/// Per-store performance settings applied to every pooled connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Page cache ceiling per connection
    pub memory_limit_mb: u32,
    /// Helper threads SQLite may use for sorting
    pub threads: u32,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 64,
            threads: 4,
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub storage: StorageConfig,
    pub maintenance_interval_ms: u64,
    /// TTL used by callers that do not pass one explicitly
    pub default_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                memory_limit_mb: 32,
                threads: 2,
                ..StorageConfig::default()
            },
            maintenance_interval_ms: 5 * 60 * 1000,
            default_ttl_ms: 60 * 60 * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.state_dir, dir.path());
        assert_eq!(config.bulk_batch_size, 100);
        assert_eq!(config.index_path(), dir.path().join("index.db"));
        assert_eq!(config.cache_path(), dir.path().join("cache.db"));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "bulk_batch_size = 7\n[cache]\nmaintenance_interval_ms = 250\n",
        )
        .unwrap();

        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.bulk_batch_size, 7);
        assert_eq!(config.cache.maintenance_interval_ms, 250);
        assert_eq!(config.storage.pool_size, 8);
    }

    #[test]
    fn test_load_rejects_zero_batch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "bulk_batch_size = 0\n").unwrap();
        assert!(matches!(
            EngineConfig::load(dir.path()),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_load_rejects_malformed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "bulk_batch_size = \"x\"").unwrap();
        assert!(EngineConfig::load(dir.path()).is_err());
    }
}
