//! Typed errors for dataset queries.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the parsing layer to the request-handling layer.
///
/// Malformed rows and out-of-range pages are absorbed by the engines and
/// never appear here.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The dataset file does not exist (download never completed).
    #[error("dataset file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// No dataset with this logical name is known to the catalog.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// None of the candidate encodings could decode the file.
    #[error("could not decode {} with any of: {tried}", path.display())]
    DecodeFailure { path: PathBuf, tried: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("query timed out")]
    TimedOut,

    /// The blocking task running the query panicked or was aborted.
    #[error("query task failed: {0}")]
    TaskFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl DatasetError {
    /// HTTP-style status code the request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            DatasetError::FileNotFound(_) | DatasetError::UnknownDataset(_) => 404,
            DatasetError::InvalidQuery(_) => 400,
            DatasetError::TimedOut => 408,
            DatasetError::DecodeFailure { .. } => 422,
            DatasetError::Cancelled => 499,
            DatasetError::TaskFailed(_) | DatasetError::Io(_) | DatasetError::Csv(_) => 500,
        }
    }

    /// `true` when retrying the same request later could succeed. A missing
    /// file means no data is available yet, which is not transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatasetError::TimedOut | DatasetError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DatasetError::FileNotFound("x".into()).status_code(), 404);
        assert_eq!(DatasetError::InvalidQuery("page".into()).status_code(), 400);
        assert_eq!(DatasetError::TimedOut.status_code(), 408);
        assert_eq!(
            DatasetError::DecodeFailure {
                path: "stops.txt".into(),
                tried: "UTF-8".into()
            }
            .status_code(),
            422
        );
    }

    #[test]
    fn test_decode_failure_is_not_transient() {
        let err = DatasetError::DecodeFailure {
            path: "stops.txt".into(),
            tried: "UTF-8, windows-1252".into(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("stops.txt"));
    }

    #[test]
    fn test_missing_file_is_not_transient() {
        assert!(!DatasetError::FileNotFound("stops.txt".into()).is_transient());
        assert!(!DatasetError::UnknownDataset("stops".into()).is_transient());
        assert!(DatasetError::TimedOut.is_transient());
    }
}
