//! Async entry point for the request layer: resolves datasets, serves
//! cached pages and runs the parsing engines on the blocking pool under a
//! deadline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, QueryCache};
use crate::catalog::Catalog;
use crate::config::{AppConfig, PaginationSettings, PaginationTable};
use crate::error::DatasetError;
use crate::page::Page;
use crate::parser::{self, CancelToken, ParserOptions, Result};
use crate::query::PageRequest;

/// Records per dataset in a preview snapshot.
pub const PREVIEW_RECORDS: usize = 25;

/// First records of every dataset, as written by the `preview` command.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub generated_at: DateTime<Utc>,
    pub datasets: BTreeMap<String, Page>,
}

pub struct DatasetService {
    catalog: Catalog,
    options: ParserOptions,
    pagination: PaginationTable,
    cache: QueryCache,
    timeout: Duration,
}

/// Trips the token when the awaiting future is dropped, so an abandoned
/// request stops its scan.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl DatasetService {
    pub fn new(
        catalog: Catalog,
        options: ParserOptions,
        pagination: PaginationTable,
        cache: QueryCache,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            options,
            pagination,
            cache,
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            Catalog::new(&config.data_dir, config.large_datasets.clone()),
            config.parser_options(),
            config.pagination()?,
            QueryCache::new(config.cache_capacity),
            config.query_timeout(),
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn pagination_for(&self, dataset: &str) -> PaginationSettings {
        self.pagination.for_dataset(dataset)
    }

    /// Builds a clamped request for `dataset` from loose string parameters.
    pub fn request_from_params<'a, I>(&self, dataset: &str, params: I) -> PageRequest
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        PageRequest::from_params(params, &self.pagination_for(dataset))
    }

    /// Runs `request` against the dataset called `name`.
    pub async fn query(&self, name: &str, request: PageRequest) -> Result<Arc<Page>> {
        let dataset = self.catalog.resolve(name)?;
        let key = CacheKey::for_file(&dataset.path, &request).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DatasetError::FileNotFound(dataset.path.clone()),
            _ => DatasetError::Io(e),
        })?;

        if let Some(page) = self.cache.get(&key) {
            debug!(dataset = %dataset.file_name, page = request.page, "Served from cache");
            return Ok(page);
        }

        let cancel = CancelToken::with_timeout(self.timeout);
        let _guard = CancelOnDrop(cancel.clone());
        let options = self.options.clone();
        let path = dataset.path.clone();
        let format = dataset.format.clone();
        let task_request = request.clone();

        let result = tokio::task::spawn_blocking(move || {
            parser::query(&path, &format, &task_request, &options, &cancel)
        })
        .await;

        let page = match result {
            Ok(page) => Arc::new(page?),
            Err(e) => return Err(DatasetError::TaskFailed(e.to_string())),
        };
        self.cache.insert(key, Arc::clone(&page));
        Ok(page)
    }

    /// The first [`PREVIEW_RECORDS`] records of every dataset. Datasets that
    /// fail to parse are logged and left out.
    pub async fn preview(&self) -> Result<Preview> {
        let mut datasets = BTreeMap::new();
        for file_name in self.catalog.list_files()? {
            let request = PageRequest::new(0, PREVIEW_RECORDS);
            match self.query(&file_name, request).await {
                Ok(page) => {
                    datasets.insert(file_name, Page::clone(&page));
                }
                Err(e) => warn!(dataset = %file_name, error = %e, "Skipping dataset in preview"),
            }
        }
        info!(datasets = datasets.len(), "Preview generated");
        Ok(Preview {
            generated_at: Utc::now(),
            datasets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QuerySpec, SortDirection};
    use tempfile::TempDir;

    fn service(dir: &TempDir, timeout: Duration) -> DatasetService {
        DatasetService::new(
            Catalog::new(dir.path(), vec!["stop_times".to_string()]),
            ParserOptions::default(),
            PaginationTable::default(),
            QueryCache::new(8),
            timeout,
        )
    }

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("stops.txt"),
            "stop_id,stop_name\nS1,Alpha\nS2,Beta\nS3,Gamma\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("stop_times.txt"),
            "trip_id,stop_id\nT1,S1\nT1,S2\nT2,S3\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_query_resolves_and_caches() {
        let dir = data_dir();
        let service = service(&dir, Duration::from_secs(5));
        let request = PageRequest::new(0, 2)
            .with_spec(QuerySpec::default().sort("stop_name", SortDirection::Desc));

        let first = service.query("stops", request.clone()).await.unwrap();
        assert_eq!(first.data[0].get("stop_id"), Some("S3"));
        assert_eq!(first.pagination.total_pages, 2);

        let second = service.query("stops.txt", request).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(service.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_large_dataset_filtered() {
        let dir = data_dir();
        let service = service(&dir, Duration::from_secs(5));
        let request =
            PageRequest::new(0, 10).with_spec(QuerySpec::default().filter("trip_id", "T1"));
        let page = service.query("stop_times", request).await.unwrap();
        assert_eq!(page.pagination.total_records, 2);
    }

    #[tokio::test]
    async fn test_unknown_dataset() {
        let dir = data_dir();
        let service = service(&dir, Duration::from_secs(5));
        let err = service.query("routes", PageRequest::new(0, 10)).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_planning_files_are_not_parsed_as_csv() {
        let dir = data_dir();
        std::fs::write(dir.path().join("planning.cfg"), "[trains]\nweekday=1\n").unwrap();
        let service = service(&dir, Duration::from_secs(5));
        for name in ["planning", "planning.cfg"] {
            let err = service.query(name, PageRequest::new(0, 10)).await.unwrap_err();
            assert!(matches!(err, DatasetError::UnknownDataset(_)));
        }
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_times_out() {
        let dir = data_dir();
        let service = service(&dir, Duration::ZERO);
        let err = service.query("stops", PageRequest::new(0, 10)).await.unwrap_err();
        assert!(matches!(err, DatasetError::TimedOut));
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_request_from_params_uses_dataset_limits() {
        let dir = data_dir();
        let service = service(&dir, Duration::from_secs(5));
        let request = service.request_from_params("stop_times.txt", vec![("limit", "9999")]);
        assert_eq!(request.page_size, 2000);
        let request = service.request_from_params("stops", Vec::<(&str, &str)>::new());
        assert_eq!(request.page_size, 1000);
    }

    #[tokio::test]
    async fn test_preview_covers_every_dataset() {
        let dir = data_dir();
        std::fs::write(dir.path().join("broken.txt"), b"a,b\n\xff\xfe\x00,\x81\n").unwrap();
        std::fs::write(dir.path().join("planning.cfg"), "[trains]\nweekday=1\n").unwrap();
        let service = DatasetService::new(
            Catalog::new(dir.path(), Vec::new()).with_format(
                parser::DatasetFormat::default().with_encodings(&["utf-8"]),
            ),
            ParserOptions::default(),
            PaginationTable::default(),
            QueryCache::new(0),
            Duration::from_secs(5),
        );
        let preview = service.preview().await.unwrap();
        let names: Vec<&String> = preview.datasets.keys().collect();
        assert_eq!(names, vec!["stop_times.txt", "stops.txt"]);
        assert_eq!(preview.datasets["stops.txt"].data.len(), 3);
    }
}
