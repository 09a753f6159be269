//! Raw line scanning over mapped bytes: counting and seeking without
//! decoding rows.
//!
//! A data line is any physical line that is not empty (a lone `\r` counts as
//! empty), matching the csv reader which skips blank lines.

use memchr::{memchr, memchr_iter, memrchr};
use std::convert::Infallible;

/// Bytes examined per step when jumping towards a distant line.
pub const SEEK_CHUNK: usize = 1024 * 1024;

/// Below this many lines a plain line-by-line skip is used.
const LINE_BY_LINE_LIMIT: usize = 100;

fn is_blank(line: &[u8]) -> bool {
    line.is_empty() || line == b"\r"
}

/// Returns the line starting at `pos` (terminator excluded) and the offset
/// of the following line.
pub fn next_line(data: &[u8], pos: usize) -> (&[u8], usize) {
    match memchr(b'\n', &data[pos..]) {
        Some(offset) => (&data[pos..pos + offset], pos + offset + 1),
        None => (&data[pos..], data.len()),
    }
}

/// Offset of the first data line at or after `pos`.
pub fn skip_blank_lines(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() {
        let (line, next) = next_line(data, pos);
        if !is_blank(line) {
            break;
        }
        pos = next;
    }
    pos
}

/// Counts data lines. Only a counter is kept, whatever the input size.
pub fn count_lines(data: &[u8]) -> usize {
    let mut count = 0;
    let mut start = 0;
    for nl in memchr_iter(b'\n', data) {
        if !is_blank(&data[start..nl]) {
            count += 1;
        }
        start = nl + 1;
    }
    if start < data.len() && !is_blank(&data[start..]) {
        count += 1;
    }
    count
}

/// Counts data lines chunk by chunk, calling `checkpoint` before each chunk
/// so long scans can be interrupted.
pub fn count_lines_with<E>(
    data: &[u8],
    mut checkpoint: impl FnMut() -> Result<(), E>,
) -> Result<usize, E> {
    let mut count = 0;
    let mut pos = 0;
    while pos < data.len() {
        checkpoint()?;
        let end = chunk_end(data, pos, SEEK_CHUNK);
        count += count_lines(&data[pos..end]);
        pos = end;
    }
    Ok(count)
}

/// End of the whole-line chunk starting at `pos`: just past the last newline
/// inside the window, or past the next newline when one line is longer than
/// the window.
fn chunk_end(data: &[u8], pos: usize, chunk: usize) -> usize {
    let window_end = pos.saturating_add(chunk).min(data.len());
    if window_end == data.len() {
        return window_end;
    }
    match memrchr(b'\n', &data[pos..window_end]) {
        Some(nl) => pos + nl + 1,
        None => memchr(b'\n', &data[window_end..])
            .map(|offset| window_end + offset + 1)
            .unwrap_or(data.len()),
    }
}

/// Byte offset of data line `n` (zero-based), or `data.len()` when the data
/// has fewer lines.
pub fn seek_line(data: &[u8], n: usize) -> usize {
    match seek_line_with(data, n, || Ok::<(), Infallible>(())) {
        Ok(pos) => pos,
        Err(never) => match never {},
    }
}

/// [`seek_line`] with a `checkpoint` polled before each chunk.
pub fn seek_line_with<E>(
    data: &[u8],
    n: usize,
    checkpoint: impl FnMut() -> Result<(), E>,
) -> Result<usize, E> {
    seek_line_chunked(data, n, SEEK_CHUNK, checkpoint)
}

pub(crate) fn seek_line_chunked<E>(
    data: &[u8],
    n: usize,
    chunk: usize,
    mut checkpoint: impl FnMut() -> Result<(), E>,
) -> Result<usize, E> {
    let mut pos = skip_blank_lines(data, 0);
    let mut remaining = n;

    if remaining > LINE_BY_LINE_LIMIT {
        // Jump over whole-line chunks while the target lies beyond them.
        while remaining > 0 && pos < data.len() {
            checkpoint()?;
            let end = chunk_end(data, pos, chunk);
            let lines = count_lines(&data[pos..end]);
            if lines > remaining {
                break;
            }
            remaining -= lines;
            pos = skip_blank_lines(data, end);
        }
    }

    while remaining > 0 && pos < data.len() {
        let (_, next) = next_line(data, pos);
        remaining -= 1;
        pos = skip_blank_lines(data, next);
    }
    Ok(pos)
}
