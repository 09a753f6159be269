//! Memory-bounded filtering for large files.
//!
//! With [`SortScope::Page`] the file is scanned twice: once to count matches,
//! once to collect only the requested page, stopping as soon as the page is
//! full. Sorting then applies to that page alone, so pages are not globally
//! ordered. [`SortScope::Global`] keeps every match in memory instead and
//! sorts before slicing.

use std::ops::ControlFlow;
use std::path::Path;
use tracing::{debug, info};

use super::cancel::CancelToken;
use super::key_filter::KeyFilter;
use super::predicate::Predicate;
use super::reader::DatasetReader;
use super::small::sort_records;
use super::{DatasetFormat, ParserOptions, Result, SortScope};
use crate::page::{Page, Pagination};
use crate::query::PageRequest;
use crate::record::Record;

pub fn parse_large_filtered(
    path: &Path,
    format: &DatasetFormat,
    request: &PageRequest,
    options: &ParserOptions,
    cancel: &CancelToken,
) -> Result<Page> {
    let reader = DatasetReader::open(path, format)?;
    streaming_page(&reader, request, options, cancel)
}

#[tracing::instrument(
    skip_all,
    fields(path = %reader.path().display(), page = request.page, page_size = request.page_size)
)]
pub(crate) fn streaming_page(
    reader: &DatasetReader,
    request: &PageRequest,
    options: &ParserOptions,
    cancel: &CancelToken,
) -> Result<Page> {
    let key_filter = KeyFilter::build(reader, &request.spec, &options.key_columns);
    if let Some(filter) = &key_filter {
        debug!(key_columns = filter.columns(), "Key column pre-check enabled");
    }
    let scan = Scan {
        reader,
        predicate: Predicate::new(&request.spec),
        key_filter: key_filter.as_ref(),
        cancel,
    };

    let page = match (options.sort_scope, &request.spec.sort) {
        (SortScope::Global, Some(_)) => scan.sorted_page(request)?,
        _ => scan.two_pass_page(request)?,
    };

    info!(
        total_records = page.pagination.total_records,
        returned = page.data.len(),
        "Streaming page served"
    );
    Ok(page)
}

struct Scan<'r> {
    reader: &'r DatasetReader,
    predicate: Predicate<'r>,
    key_filter: Option<&'r KeyFilter>,
    cancel: &'r CancelToken,
}

impl Scan<'_> {
    /// Streams every row, calling `on_match` for each matching record until
    /// it breaks. The record buffer is reused between rows.
    fn for_each_match(
        &self,
        mut on_match: impl FnMut(&Record) -> ControlFlow<()>,
    ) -> Result<usize> {
        let mut records = self.reader.records();
        let mut scratch = records.empty_record();
        let encoding = self.reader.encoding();
        let mut row = 0;

        while records.advance()? {
            self.cancel.check_every(row)?;
            row += 1;

            if let Some(filter) = self.key_filter {
                if !filter.admits(&records, encoding) {
                    continue;
                }
            }
            records.decode_into(&mut scratch);
            if self.predicate.matches(&scratch) && on_match(&scratch).is_break() {
                break;
            }
        }

        if records.malformed_rows() > 0 {
            debug!(malformed = records.malformed_rows(), "Short or long rows truncated");
        }
        Ok(row)
    }

    fn two_pass_page(&self, request: &PageRequest) -> Result<Page> {
        let mut total = 0usize;
        let rows = self.for_each_match(|_| {
            total += 1;
            ControlFlow::Continue(())
        })?;
        let pagination = Pagination::new(request.page, request.page_size, total);
        debug!(rows, matches = total, "Count pass finished");

        if pagination.is_out_of_range() || total == 0 {
            return Ok(Page::empty(pagination));
        }

        let (start, end) = pagination.window();
        if start >= end {
            return Ok(Page::empty(pagination));
        }
        let mut index = 0usize;
        let mut data = Vec::with_capacity(request.page_size.min(total));
        self.for_each_match(|record| {
            if index >= start {
                data.push(record.clone());
            }
            index += 1;
            if index >= end {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        if let Some(sort) = &request.spec.sort {
            sort_records(&mut data, sort);
        }
        Ok(Page::new(data, pagination))
    }

    fn sorted_page(&self, request: &PageRequest) -> Result<Page> {
        let mut matched = Vec::new();
        self.for_each_match(|record| {
            matched.push(record.clone());
            ControlFlow::Continue(())
        })?;

        if let Some(sort) = &request.spec.sort {
            sort_records(&mut matched, sort);
        }
        let pagination = Pagination::new(request.page, request.page_size, matched.len());
        let (start, end) = pagination.window();
        let data = matched
            .into_iter()
            .skip(start)
            .take(end - start)
            .collect();
        Ok(Page::new(data, pagination))
    }
}
