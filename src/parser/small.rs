//! In-memory engine for datasets below the large-file threshold.

use std::path::Path;
use tracing::{debug, info};

use super::cancel::CancelToken;
use super::predicate::Predicate;
use super::reader::DatasetReader;
use super::{DatasetFormat, Result};
use crate::page::{Page, Pagination};
use crate::query::{PageRequest, Sort, SortDirection};
use crate::record::Record;

/// Loads the whole file, filters, sorts and slices the requested page.
pub fn parse_small(
    path: &Path,
    format: &DatasetFormat,
    request: &PageRequest,
    cancel: &CancelToken,
) -> Result<Page> {
    let reader = DatasetReader::open(path, format)?;
    small_page(&reader, request, cancel)
}

#[tracing::instrument(
    skip_all,
    fields(path = %reader.path().display(), page = request.page, page_size = request.page_size)
)]
pub(crate) fn small_page(
    reader: &DatasetReader,
    request: &PageRequest,
    cancel: &CancelToken,
) -> Result<Page> {
    let predicate = Predicate::new(&request.spec);
    let mut matched = Vec::new();
    let mut records = reader.records();
    let mut row = 0;

    while records.advance()? {
        cancel.check_every(row)?;
        row += 1;
        let record = records.current();
        if predicate.matches(&record) {
            matched.push(record);
        }
    }
    debug!(rows = row, malformed = records.malformed_rows(), "Small file loaded");

    if let Some(sort) = &request.spec.sort {
        sort_records(&mut matched, sort);
    }

    let pagination = Pagination::new(request.page, request.page_size, matched.len());
    let (start, end) = pagination.window();
    let data: Vec<Record> = matched
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect();

    info!(
        total_records = pagination.total_records,
        returned = data.len(),
        "Small file page served"
    );
    Ok(Page::new(data, pagination))
}

/// Stable sort on the lowercased value of `sort.field`; rows without the
/// column sort as an empty string. Descending order keeps ties in their
/// original relative order.
pub fn sort_records(records: &mut Vec<Record>, sort: &Sort) {
    let mut keyed: Vec<(String, Record)> = records
        .drain(..)
        .map(|r| (r.get(&sort.field).unwrap_or("").to_lowercase(), r))
        .collect();

    match sort.direction {
        SortDirection::Asc => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
        SortDirection::Desc => keyed.sort_by(|a, b| b.0.cmp(&a.0)),
    }

    records.extend(keyed.into_iter().map(|(_, r)| r));
}
