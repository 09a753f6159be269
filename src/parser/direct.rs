//! Direct pagination for large files when no search, filter or sort is
//! requested: count lines once, jump to the page and decode only its rows.

use std::path::Path;
use tracing::{debug, info};

use super::cancel::CancelToken;
use super::lines;
use super::reader::DatasetReader;
use super::{DatasetFormat, Result};
use crate::page::{Page, Pagination};

pub fn parse_large_direct(
    path: &Path,
    format: &DatasetFormat,
    page: usize,
    page_size: usize,
    cancel: &CancelToken,
) -> Result<Page> {
    let reader = DatasetReader::open(path, format)?;
    direct_page(&reader, page, page_size, cancel)
}

#[tracing::instrument(
    skip_all,
    fields(path = %reader.path().display(), page = page, page_size = page_size)
)]
pub(crate) fn direct_page(
    reader: &DatasetReader,
    page: usize,
    page_size: usize,
    cancel: &CancelToken,
) -> Result<Page> {
    let body = reader.body();
    let total_lines = lines::count_lines_with(body, || cancel.check())?;
    let pagination = Pagination::new(page, page_size, total_lines);
    debug!(
        total_lines,
        total_pages = pagination.total_pages,
        "Lines counted"
    );

    let (start, end) = pagination.window();
    if start >= total_lines {
        return Ok(Page::empty(pagination));
    }
    let wanted = end.min(total_lines) - start;

    let offset = lines::seek_line_with(body, start, || cancel.check())?;
    debug!(start_line = start, offset, wanted, "Seeked to page");

    let mut records = reader.records_from(offset);
    let mut data = Vec::with_capacity(wanted);
    while data.len() < wanted && records.advance()? {
        data.push(records.current());
    }
    if records.malformed_rows() > 0 {
        debug!(malformed = records.malformed_rows(), "Short or long rows truncated");
    }

    info!(
        total_records = total_lines,
        returned = data.len(),
        "Direct page served"
    );
    Ok(Page::new(data, pagination))
}
