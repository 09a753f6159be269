//! Encoding-tolerant, memory-mapped record reader.
//!
//! Opening a dataset maps the file, strips a UTF-8 BOM, picks the first
//! candidate encoding that decodes the whole file and parses the header.
//! Records are then produced lazily by a csv reader over the mapped bytes,
//! so a scan never holds more than the current row.

use csv::ByteRecord;
use encoding_rs::Encoding;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::encoding;
use super::lines;
use super::{DatasetFormat, Result};
use crate::error::DatasetError;
use crate::record::Record;

pub struct DatasetReader {
    path: PathBuf,
    map: Option<Mmap>,
    /// Offset just past an optional BOM.
    start: usize,
    /// Offset of the first data line, relative to `start`.
    body_offset: usize,
    delimiter: u8,
    encoding: &'static Encoding,
    header: Arc<[String]>,
}

impl DatasetReader {
    pub fn open(path: &Path, format: &DatasetFormat) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DatasetError::FileNotFound(path.to_path_buf()),
            _ => DatasetError::Io(e),
        })?;
        let len = file.metadata()?.len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: datasets are replaced by rename, never written in place,
            // so the mapped inode stays unchanged while mapped. Read-only access.
            Some(unsafe { Mmap::map(&file)? })
        };

        let raw: &[u8] = map.as_deref().unwrap_or(&[]);
        let (text, had_bom) = encoding::strip_bom(raw);
        let start = raw.len() - text.len();

        let encoding = encoding::detect(text, &format.encodings).ok_or_else(|| {
            DatasetError::DecodeFailure {
                path: path.to_path_buf(),
                tried: encoding::describe(&format.encodings),
            }
        })?;

        let first = lines::skip_blank_lines(text, 0);
        let (header_line, after_header) = lines::next_line(text, first);
        let (header, body_offset) = if format.has_header {
            let names = split_line(header_line, format.delimiter, encoding)?
                .into_iter()
                .map(|name| name.trim().to_string())
                .collect::<Vec<_>>();
            (names, after_header)
        } else {
            let width = split_line(header_line, format.delimiter, encoding)?.len();
            ((1..=width).map(|i| format!("column_{i}")).collect(), first)
        };

        debug!(
            path = %path.display(),
            bytes = len,
            encoding = encoding.name(),
            had_bom,
            columns = header.len(),
            "Dataset opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            map,
            start,
            body_offset,
            delimiter: format.delimiter,
            encoding,
            header: header.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Arc<[String]> {
        &self.header
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|c| c == column)
    }

    /// Bytes after the header line.
    pub fn body(&self) -> &[u8] {
        let raw: &[u8] = self.map.as_deref().unwrap_or(&[]);
        &raw[self.start + self.body_offset..]
    }

    /// A fresh stream over every data row. Call again to restart.
    pub fn records(&self) -> Records<'_> {
        self.records_from(0)
    }

    /// A stream starting at byte `offset` of [`Self::body`], which must be
    /// the start of a line.
    pub fn records_from(&self, offset: usize) -> Records<'_> {
        let csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(&self.body()[offset..]);
        Records {
            csv,
            row: ByteRecord::new(),
            header: Arc::clone(&self.header),
            encoding: self.encoding,
            malformed: 0,
        }
    }
}

/// Lazy record stream over a mapped dataset.
pub struct Records<'a> {
    csv: csv::Reader<&'a [u8]>,
    row: ByteRecord,
    header: Arc<[String]>,
    encoding: &'static Encoding,
    malformed: usize,
}

impl Records<'_> {
    /// Advances to the next raw row without decoding it.
    pub fn advance(&mut self) -> Result<bool> {
        let more = self.csv.read_byte_record(&mut self.row)?;
        if more && self.row.len() != self.header.len() {
            self.malformed += 1;
        }
        Ok(more)
    }

    /// Raw bytes of field `idx` of the current row.
    pub fn raw_field(&self, idx: usize) -> Option<&[u8]> {
        self.row.get(idx)
    }

    /// Decodes the current row into `record`, reusing its buffers.
    pub fn decode_into(&self, record: &mut Record) {
        let values = record.values_mut();
        values.clear();
        for field in self.row.iter().take(self.header.len()) {
            values.push(encoding::decode(field, self.encoding).into_owned());
        }
    }

    /// Decodes the current row into a new record.
    pub fn current(&self) -> Record {
        let mut record = self.empty_record();
        self.decode_into(&mut record);
        record
    }

    /// A record with this stream's header and no values, for buffer reuse.
    pub fn empty_record(&self) -> Record {
        Record::new(Arc::clone(&self.header), Vec::with_capacity(self.header.len()))
    }

    /// Rows seen so far whose field count differs from the header.
    pub fn malformed_rows(&self) -> usize {
        self.malformed
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => Some(Ok(self.current())),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

fn split_line(line: &[u8], delimiter: u8, encoding: &'static Encoding) -> Result<Vec<String>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(line);
    let mut row = ByteRecord::new();
    if !csv.read_byte_record(&mut row)? {
        return Ok(Vec::new());
    }
    Ok(row
        .iter()
        .map(|field| encoding::decode(field, encoding).into_owned())
        .collect())
}
