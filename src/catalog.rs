//! Dataset catalog: maps logical dataset names to files in the data
//! directory and attaches the format each file is read with.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::DatasetError;
use crate::parser::{DatasetFormat, Result};

/// Extensions of delimited datasets, tried in order for a name given
/// without one. Other files in the data directory (planning `.cfg` files,
/// realtime payloads) are not tabular and are never served.
const EXTENSIONS: &[&str] = &["txt", "csv"];

/// Names the upstream archive is known to store under a different file.
const ALIASES: &[(&str, &str)] = &[("transfers", "stops.txt_transfers.txt")];

/// A dataset file resolved from a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub file_name: String,
    pub path: PathBuf,
    pub format: DatasetFormat,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    data_dir: PathBuf,
    large_datasets: Vec<String>,
    base_format: DatasetFormat,
}

impl Catalog {
    pub fn new(data_dir: impl Into<PathBuf>, large_datasets: Vec<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            large_datasets,
            base_format: DatasetFormat::default(),
        }
    }

    /// Uses `format` as the starting point for every dataset.
    pub fn with_format(mut self, format: DatasetFormat) -> Self {
        self.base_format = format;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Dataset files currently present, sorted by name. Hidden files
    /// (including in-flight downloads) and non-tabular files are skipped.
    /// A missing data directory lists as empty.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && is_tabular(name) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Resolves `name` (`stops`, `stops.txt`, `transfers`) to a dataset file.
    pub fn resolve(&self, name: &str) -> Result<Dataset> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(DatasetError::UnknownDataset(name.to_string()));
        }

        let file_name = if name.contains('.') {
            if !is_tabular(name) {
                return Err(DatasetError::UnknownDataset(name.to_string()));
            }
            name.to_string()
        } else {
            self.find_with_extension(name)?
        };
        debug!(name, file_name = %file_name, "Dataset resolved");

        Ok(Dataset {
            path: self.data_dir.join(&file_name),
            format: self.format_for(&file_name),
            file_name,
        })
    }

    fn find_with_extension(&self, stem: &str) -> Result<String> {
        let files = self.list_files()?;
        let candidates = EXTENSIONS
            .iter()
            .map(|ext| format!("{stem}.{ext}"))
            .chain(
                ALIASES
                    .iter()
                    .filter(|(alias, _)| *alias == stem)
                    .map(|(_, file)| file.to_string()),
            );
        for candidate in candidates {
            if files.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(DatasetError::UnknownDataset(stem.to_string()))
    }

    /// Format for `file_name`: the base format, forced onto the large-file
    /// engines when its stem is listed as a large dataset.
    pub fn format_for(&self, file_name: &str) -> DatasetFormat {
        let stem = dataset_stem(file_name);
        let large = self.large_datasets.iter().any(|d| d == stem);
        self.base_format.clone().large(large || self.base_format.large)
    }
}

fn is_tabular(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
}

/// `stop_times.txt` → `stop_times`.
pub fn dataset_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}
