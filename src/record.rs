//! A single row of a flat-file dataset.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

/// Ordered mapping from column name to raw string value.
///
/// The header is shared between every record of one read. When a row has
/// fewer values than the header, the trailing columns are absent; extra
/// values beyond the header are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    header: Arc<[String]>,
    values: Vec<String>,
}

impl Record {
    pub fn new(header: Arc<[String]>, mut values: Vec<String>) -> Self {
        values.truncate(header.len());
        Self { header, values }
    }

    /// Builds a record from `(column, value)` pairs; mostly useful in tests.
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: Vec<(K, V)>) -> Self {
        let (header, values): (Vec<String>, Vec<String>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).unzip();
        Self::new(header.into(), values)
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.header.iter().position(|c| c == column)?;
        self.values.get(idx).map(String::as_str)
    }

    /// Number of columns present in this record.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(column, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    /// Gives the value buffer back for reuse while scanning.
    pub(crate) fn values_mut(&mut self) -> &mut Vec<String> {
        &mut self.values
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
