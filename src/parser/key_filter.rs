//! Positional pre-check on identifier columns, run on the raw row before it
//! is decoded into a [`Record`](crate::record::Record).
//!
//! Every row the pre-check admits still goes through the full predicate, so
//! results are identical with or without it.

use encoding_rs::{Encoding, UTF_8};

use super::encoding;
use super::reader::{DatasetReader, Records};
use crate::query::QuerySpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    /// `(column index, expected value)` pairs that must all hold.
    Columns(Vec<(usize, String)>),
    /// A key column is filtered on but missing from the header.
    Impossible,
}

impl KeyFilter {
    /// Builds a pre-check when `spec` filters on any of `key_columns`.
    pub fn build(
        reader: &DatasetReader,
        spec: &QuerySpec,
        key_columns: &[String],
    ) -> Option<Self> {
        let mut checks = Vec::new();
        for (column, value) in &spec.filters {
            if !key_columns.iter().any(|k| k == column) {
                continue;
            }
            match reader.column_index(column) {
                Some(idx) => checks.push((idx, value.clone())),
                None => return Some(KeyFilter::Impossible),
            }
        }
        if checks.is_empty() {
            None
        } else {
            Some(KeyFilter::Columns(checks))
        }
    }

    /// `true` when the current raw row may match.
    pub fn admits(&self, records: &Records<'_>, encoding: &'static Encoding) -> bool {
        match self {
            KeyFilter::Impossible => false,
            KeyFilter::Columns(checks) => checks.iter().all(|(idx, expected)| {
                match records.raw_field(*idx) {
                    Some(raw) if encoding == UTF_8 => raw == expected.as_bytes(),
                    Some(raw) => encoding::decode(raw, encoding) == expected.as_str(),
                    None => false,
                }
            }),
        }
    }

    pub fn columns(&self) -> usize {
        match self {
            KeyFilter::Columns(checks) => checks.len(),
            KeyFilter::Impossible => 0,
        }
    }
}
