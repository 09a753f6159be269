//! Bounded LRU cache of query results.
//!
//! Entries are keyed on the file's length and modification time as well as
//! its path, so a dataset replaced on disk misses instead of serving stale
//! pages.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::trace;

use crate::page::Page;
use crate::query::PageRequest;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
    request: PageRequest,
}

impl CacheKey {
    /// Key for `request` against the current version of the file at `path`.
    pub fn for_file(path: &Path, request: &PageRequest) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
            request: request.clone(),
        })
    }
}

/// Shared LRU of recent pages. Capacity 0 stores nothing.
pub struct QueryCache {
    inner: Option<Mutex<LruCache<CacheKey, Arc<Page>>>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<CacheKey, Arc<Page>>>> {
        // Stored pages are immutable, so a poisoned lock is still usable.
        self.inner
            .as_ref()
            .map(|inner| inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Page>> {
        let page = self.lock()?.get(key).cloned()?;
        trace!(path = %key.path.display(), "Cache hit");
        Some(page)
    }

    pub fn insert(&self, key: CacheKey, page: Arc<Page>) {
        let Some(mut lru) = self.lock() else {
            return;
        };
        // `push` also returns the old entry when the key was already present
        if let Some((evicted, _)) = lru.push(key, page) {
            if !lru.contains(&evicted) {
                trace!(path = %evicted.path.display(), "Cache eviction");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |lru| lru.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Pagination;

    fn key(page: usize) -> CacheKey {
        CacheKey {
            path: PathBuf::from("stops.txt"),
            len: 10,
            modified: None,
            request: PageRequest::new(page, 10),
        }
    }

    fn page(total: usize) -> Arc<Page> {
        Arc::new(Page::empty(Pagination::new(0, 10, total)))
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = QueryCache::new(2);
        cache.insert(key(0), page(0));
        cache.insert(key(1), page(1));
        assert!(cache.get(&key(0)).is_some());

        cache.insert(key(2), page(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(0)).is_some());
        assert!(cache.get(&key(2)).is_some());
    }

    #[test]
    fn test_reinsert_replaces_without_eviction() {
        let cache = QueryCache::new(2);
        cache.insert(key(0), page(0));
        cache.insert(key(1), page(1));
        cache.insert(key(0), page(7));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(0)).unwrap().pagination.total_records, 7);
        assert!(cache.get(&key(1)).is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = QueryCache::new(0);
        cache.insert(key(0), page(0));
        assert!(cache.is_empty());
        assert!(cache.get(&key(0)).is_none());
    }

    #[test]
    fn test_changed_file_misses() {
        let cache = QueryCache::new(4);
        cache.insert(key(0), page(3));
        let mut replaced = key(0);
        replaced.len = 11;
        assert!(cache.get(&replaced).is_none());
    }
}
