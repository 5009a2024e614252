use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV: &str = "CLICKDUCK_CONFIG";
/// Environment variable overriding the database location (`:memory:` for in-memory).
pub const DB_PATH_ENV: &str = "CLICKDUCK_DB_PATH";

const IN_MEMORY_PATH: &str = ":memory:";

/// Where the embedded database lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageMode {
    InMemory,
    File { path: PathBuf },
}

impl StorageMode {
    /// Parse a path-like value; `:memory:` selects in-memory mode.
    pub fn from_path_str(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == IN_MEMORY_PATH {
            StorageMode::InMemory
        } else {
            StorageMode::File {
                path: PathBuf::from(value),
            }
        }
    }

    pub fn display_string(&self) -> String {
        match self {
            StorageMode::InMemory => IN_MEMORY_PATH.to_string(),
            StorageMode::File { path } => path.display().to_string(),
        }
    }
}

impl Default for StorageMode {
    fn default() -> Self {
        if cfg!(test) {
            return StorageMode::InMemory;
        }
        StorageMode::File {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Fail statements the rewriter could only partially translate.
    pub strict_rewrite: bool,
    /// DuckDB worker threads (`SET threads`).
    pub threads: Option<u32>,
    /// DuckDB memory limit, e.g. `"2GB"` (`SET memory_limit`).
    pub memory_limit: Option<String>,
    // Table-valued fields stay last so TOML output is well-formed.
    pub storage: StorageMode,
    /// Logical table names used by callers, mapped to physical tables.
    pub table_aliases: BTreeMap<String, String>,
    /// Tables with replace-by-key insert semantics, mapped to their key columns.
    pub replacing_tables: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let mut table_aliases = BTreeMap::new();
        table_aliases.insert(
            String::from("monitor_events"),
            String::from("uptime_monitor_events"),
        );

        let mut replacing_tables = BTreeMap::new();
        replacing_tables.insert(
            String::from("uptime_monitor_status"),
            vec![String::from("monitor_id")],
        );

        Self {
            strict_rewrite: false,
            threads: None,
            memory_limit: None,
            storage: StorageMode::default(),
            table_aliases,
            replacing_tables,
        }
    }
}

impl Config {
    pub fn in_memory() -> Self {
        Self {
            storage: StorageMode::InMemory,
            ..Self::default()
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageMode::File { path: path.into() },
            ..Self::default()
        }
    }

    pub fn get_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clickduck")
            .join("config.toml")
    }

    /// Load configuration from `$CLICKDUCK_CONFIG` or the user config
    /// directory, falling back to defaults, then apply `$CLICKDUCK_DB_PATH`.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::get_config_path);

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            config.storage = StorageMode::from_path_str(&db_path);
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clickduck")
        .join("analytics.duckdb")
}
