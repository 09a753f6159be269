//! The paginated response envelope shared by every engine.

use serde::{Deserialize, Serialize};

use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_records: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: usize, page_size: usize, total_records: usize) -> Self {
        let total_pages = if page_size == 0 {
            1
        } else {
            total_records.div_ceil(page_size)
        };
        Self {
            page,
            page_size,
            total_records,
            total_pages,
            has_next_page: page < total_pages.saturating_sub(1),
            has_prev_page: page > 0,
        }
    }

    /// `true` when the requested page lies beyond the last page.
    pub fn is_out_of_range(&self) -> bool {
        self.total_pages > 0 && self.page >= self.total_pages
    }

    /// Half-open range of record indices covered by this page.
    pub fn window(&self) -> (usize, usize) {
        let start = self.page.saturating_mul(self.page_size);
        (start, start.saturating_add(self.page_size))
    }
}

/// `{data, pagination}` as returned by every query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub data: Vec<Record>,
    pub pagination: Pagination,
}

impl Page {
    pub fn new(data: Vec<Record>, pagination: Pagination) -> Self {
        debug_assert!(data.len() <= pagination.page_size);
        Self { data, pagination }
    }

    pub fn empty(pagination: Pagination) -> Self {
        Self {
            data: Vec::new(),
            pagination,
        }
    }
}
