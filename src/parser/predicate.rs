//! Row matching: case-insensitive substring search plus exact filters.

use std::collections::BTreeMap;

use crate::query::QuerySpec;
use crate::record::Record;

/// A [`QuerySpec`] prepared for evaluation against many rows.
#[derive(Debug, Clone)]
pub struct Predicate<'a> {
    /// Lowercased query and optional column scope.
    search: Option<(String, Option<&'a str>)>,
    filters: &'a BTreeMap<String, String>,
}

impl<'a> Predicate<'a> {
    pub fn new(spec: &'a QuerySpec) -> Self {
        Self {
            search: spec
                .search
                .as_ref()
                .map(|s| (s.query.to_lowercase(), s.field.as_deref())),
            filters: &spec.filters,
        }
    }

    /// `true` when every row matches.
    pub fn is_pass_through(&self) -> bool {
        let search_open = match &self.search {
            None => true,
            Some((query, _)) => query.is_empty(),
        };
        search_open && self.filters.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some((query, field)) = &self.search {
            let found = match field {
                Some(field) => record
                    .get(field)
                    .is_some_and(|value| contains_ignore_case(value, query)),
                None => record.values().any(|value| contains_ignore_case(value, query)),
            };
            if !found {
                return false;
            }
        }

        self.filters
            .iter()
            .all(|(column, expected)| record.get(column) == Some(expected.as_str()))
    }
}

/// `needle` must already be lowercase.
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.is_ascii() && needle.is_ascii() {
        return haystack
            .as_bytes()
            .windows(needle.len())
            .any(|w| w.eq_ignore_ascii_case(needle.as_bytes()));
    }
    haystack.to_lowercase().contains(needle)
}

/// One-shot form of [`Predicate::matches`].
pub fn matches(record: &Record, spec: &QuerySpec) -> bool {
    Predicate::new(spec).matches(record)
}
