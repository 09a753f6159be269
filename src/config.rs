//! Application configuration from environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::dataset_stem;
use crate::parser::{DEFAULT_KEY_COLUMNS, DEFAULT_LARGE_FILE_THRESHOLD, ParserOptions, SortScope};

/// Default and maximum page size for one logical dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PaginationSettings {
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_size: 1000,
            max_size: 5000,
        }
    }
}

/// Per-dataset page size limits, keyed by dataset name without extension.
///
/// Overrides are a JSON object on disk:
/// ```json
/// {
///   "stop_times": { "default_size": 250, "max_size": 1000 }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PaginationTable {
    entries: HashMap<String, PaginationSettings>,
}

impl Default for PaginationTable {
    fn default() -> Self {
        let entries = [
            ("default", 1000, 5000),
            ("realtime_data", 1000, 3000),
            ("stop_times", 500, 2000),
            ("trajectories", 1000, 1000),
        ]
        .into_iter()
        .map(|(name, default_size, max_size)| {
            (
                name.to_string(),
                PaginationSettings {
                    default_size,
                    max_size,
                },
            )
        })
        .collect();
        Self { entries }
    }
}

impl PaginationTable {
    /// Built-in limits with the entries of the JSON file at `path` layered on top.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pagination config {}", path.display()))?;
        let overrides: HashMap<String, PaginationSettings> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid pagination config {}", path.display()))?;

        let mut table = Self::default();
        table.entries.extend(overrides);
        Ok(table)
    }

    /// Limits for `dataset`; `stop_times.txt` and `stop_times` are the same
    /// dataset. Unknown datasets get the `default` entry.
    pub fn for_dataset(&self, dataset: &str) -> PaginationSettings {
        let name = dataset_stem(dataset);
        self.entries
            .get(name)
            .or_else(|| self.entries.get("default"))
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub large_file_threshold: u64,
    /// Dataset names always served by the large-file engines.
    pub large_datasets: Vec<String>,
    pub sort_scope: SortScope,
    /// Maximum cached query results. 0 disables the cache.
    pub cache_capacity: usize,
    pub query_timeout_secs: u64,
    pub key_columns: Vec<String>,
    /// Optional JSON file overriding the built-in page size limits.
    pub pagination_config: Option<PathBuf>,
    /// JSON file mapping dataset file names to download URLs.
    pub refresh_sources: Option<PathBuf>,
    pub refresh_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "data".to_string())
                .into(),
            large_file_threshold: std::env::var("LARGE_FILE_THRESHOLD_BYTES")
                .unwrap_or_else(|_| DEFAULT_LARGE_FILE_THRESHOLD.to_string())
                .parse()
                .context("Invalid LARGE_FILE_THRESHOLD_BYTES")?,
            large_datasets: list_var("LARGE_DATASETS", &["stop_times"]),
            sort_scope: std::env::var("SORT_SCOPE")
                .unwrap_or_else(|_| "page".to_string())
                .parse()
                .context("Invalid SORT_SCOPE")?,
            cache_capacity: std::env::var("CACHE_CAPACITY")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .context("Invalid CACHE_CAPACITY")?,
            query_timeout_secs: std::env::var("QUERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid QUERY_TIMEOUT_SECS")?,
            key_columns: list_var("KEY_COLUMNS", DEFAULT_KEY_COLUMNS),
            pagination_config: std::env::var("PAGINATION_CONFIG").ok().map(PathBuf::from),
            refresh_sources: std::env::var("REFRESH_SOURCES").ok().map(PathBuf::from),
            refresh_interval_secs: std::env::var("REFRESH_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid REFRESH_INTERVAL_SECS")?,
        })
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            large_file_threshold: self.large_file_threshold,
            sort_scope: self.sort_scope,
            key_columns: self.key_columns.clone(),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn pagination(&self) -> Result<PaginationTable> {
        match &self.pagination_config {
            Some(path) => PaginationTable::load(path),
            None => Ok(PaginationTable::default()),
        }
    }
}

fn list_var(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(value) => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: &[&str] = &[
        "DATA_DIR",
        "LARGE_FILE_THRESHOLD_BYTES",
        "LARGE_DATASETS",
        "SORT_SCOPE",
        "CACHE_CAPACITY",
        "QUERY_TIMEOUT_SECS",
        "KEY_COLUMNS",
        "PAGINATION_CONFIG",
        "REFRESH_SOURCES",
        "REFRESH_INTERVAL_SECS",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.large_file_threshold, 10 * 1024 * 1024);
        assert_eq!(config.large_datasets, vec!["stop_times"]);
        assert_eq!(config.sort_scope, SortScope::Page);
        assert_eq!(config.cache_capacity, 64);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.key_columns, vec!["stop_id", "trip_id", "route_id"]);
        assert!(config.pagination_config.is_none());
        assert_eq!(config.refresh_interval_secs, 30);
    }

    #[test]
    fn test_from_env_with_vars() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe {
            std::env::set_var("DATA_DIR", "/srv/gtfs");
            std::env::set_var("LARGE_FILE_THRESHOLD_BYTES", "1024");
            std::env::set_var("LARGE_DATASETS", "stop_times, shapes,");
            std::env::set_var("SORT_SCOPE", "global");
            std::env::set_var("CACHE_CAPACITY", "0");
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/gtfs"));
        assert_eq!(config.large_datasets, vec!["stop_times", "shapes"]);
        let options = config.parser_options();
        assert_eq!(options.large_file_threshold, 1024);
        assert_eq!(options.sort_scope, SortScope::Global);
        assert_eq!(config.cache_capacity, 0);

        clear_env();
    }

    #[test]
    fn test_from_env_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        unsafe { std::env::set_var("QUERY_TIMEOUT_SECS", "soon") };
        assert!(AppConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    fn test_builtin_pagination_table() {
        let table = PaginationTable::default();
        assert_eq!(table.for_dataset("stop_times.txt").default_size, 500);
        assert_eq!(table.for_dataset("stop_times").max_size, 2000);
        assert_eq!(table.for_dataset("trajectories").max_size, 1000);
        assert_eq!(table.for_dataset("stops.txt"), PaginationSettings::default());
    }

    #[test]
    fn test_pagination_override_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "stops": {{"default_size": 50, "max_size": 100}},
                "stop_times": {{"default_size": 10, "max_size": 20}}
            }}"#
        )
        .unwrap();
        file.flush().unwrap();

        let table = PaginationTable::load(file.path()).unwrap();
        assert_eq!(table.for_dataset("stops.txt").max_size, 100);
        assert_eq!(table.for_dataset("stop_times").default_size, 10);
        assert_eq!(table.for_dataset("realtime_data").max_size, 3000);
    }
}
