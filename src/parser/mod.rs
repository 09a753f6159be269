//! Parsing engines for flat GTFS datasets and the dispatcher choosing
//! between them.
//!
//! - [`small`] loads the whole file and is used below the size threshold.
//! - [`direct`] seeks straight to a page of a large file when nothing is
//!   filtered or sorted.
//! - [`streaming`] filters a large file in bounded memory.

pub mod cancel;
pub mod direct;
pub mod encoding;
pub mod key_filter;
pub mod lines;
pub mod predicate;
pub mod reader;
pub mod small;
pub mod streaming;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::DatasetError;
use crate::page::Page;
use crate::query::PageRequest;

pub use cancel::CancelToken;
pub use direct::parse_large_direct;
pub use predicate::matches;
pub use reader::DatasetReader;
pub use small::{parse_small, sort_records};
pub use streaming::parse_large_filtered;

pub type Result<T> = std::result::Result<T, DatasetError>;

/// Default size above which a dataset is scanned instead of loaded.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Identifier-like columns worth a raw pre-check before full decoding.
pub const DEFAULT_KEY_COLUMNS: &[&str] = &["stop_id", "trip_id", "route_id"];

/// How a dataset file is laid out on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetFormat {
    pub delimiter: u8,
    /// When false, columns are named `column_1`, `column_2`, ...
    pub has_header: bool,
    /// Tried in order; the first that decodes the whole file wins.
    pub encodings: Vec<&'static Encoding>,
    /// Always use the large-file engines, whatever the size.
    pub large: bool,
}

impl Default for DatasetFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            encodings: encoding::resolve_labels(encoding::DEFAULT_ENCODINGS),
            large: false,
        }
    }
}

impl DatasetFormat {
    pub fn with_encodings<S: AsRef<str>>(mut self, labels: &[S]) -> Self {
        self.encodings = encoding::resolve_labels(labels);
        self
    }

    pub fn large(mut self, large: bool) -> Self {
        self.large = large;
        self
    }
}

/// Which records a sort applies to in the streaming engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortScope {
    /// Only the returned page is sorted; memory stays bounded by the page size.
    #[default]
    Page,
    /// Every match is collected and sorted before slicing.
    Global,
}

impl FromStr for SortScope {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "page" => Ok(SortScope::Page),
            "global" => Ok(SortScope::Global),
            other => Err(DatasetError::InvalidQuery(format!(
                "unknown sort scope '{other}', expected 'page' or 'global'"
            ))),
        }
    }
}

impl fmt::Display for SortScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortScope::Page => write!(f, "page"),
            SortScope::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserOptions {
    pub large_file_threshold: u64,
    pub sort_scope: SortScope,
    pub key_columns: Vec<String>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            sort_scope: SortScope::default(),
            key_columns: DEFAULT_KEY_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Small,
    Direct,
    Streaming,
}

impl Engine {
    /// Engine for a file of `size` bytes under this request.
    pub fn select(
        size: u64,
        format: &DatasetFormat,
        request: &PageRequest,
        options: &ParserOptions,
    ) -> Self {
        let large = format.large || size >= options.large_file_threshold;
        if !large {
            Engine::Small
        } else if request.spec.has_criteria() {
            Engine::Streaming
        } else {
            Engine::Direct
        }
    }
}

/// Runs `request` against the dataset at `path`, picking the engine from the
/// file size and the request.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn query(
    path: &Path,
    format: &DatasetFormat,
    request: &PageRequest,
    options: &ParserOptions,
    cancel: &CancelToken,
) -> Result<Page> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DatasetError::FileNotFound(path.to_path_buf()),
        _ => DatasetError::Io(e),
    })?;
    let engine = Engine::select(metadata.len(), format, request, options);
    debug!(bytes = metadata.len(), ?engine, "Engine selected");

    let reader = DatasetReader::open(path, format)?;
    let page = match engine {
        Engine::Small => small::small_page(&reader, request, cancel)?,
        Engine::Direct => {
            direct::direct_page(&reader, request.page, request.page_size, cancel)?
        }
        Engine::Streaming => streaming::streaming_page(&reader, request, options, cancel)?,
    };

    info!(
        ?engine,
        page = page.pagination.page,
        total_pages = page.pagination.total_pages,
        "Query complete"
    );
    Ok(page)
}
