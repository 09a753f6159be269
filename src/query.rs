//! Typed query specification and the request-boundary clamping policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::config::PaginationSettings;
use crate::error::DatasetError;

/// GTFS columns that may be used as exact-match filters from request
/// parameters (`?stop_id=8821006`).
pub const FILTERABLE_COLUMNS: &[&str] = &[
    // stops
    "stop_id",
    "stop_name",
    "stop_code",
    "location_type",
    "parent_station",
    "platform_code",
    // trips and routes
    "trip_id",
    "route_id",
    "route_short_name",
    "route_long_name",
    "route_type",
    "service_id",
    "direction_id",
    // stop times
    "arrival_time",
    "departure_time",
    "stop_sequence",
    "pickup_type",
    "drop_off_type",
    // calendar
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "start_date",
    "end_date",
    // agency
    "agency_id",
    "agency_name",
    "agency_url",
    "agency_timezone",
    // translations
    "trans_id",
    "lang",
    "translation",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(DatasetError::InvalidQuery(format!(
                "unknown sort direction '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "asc"),
            SortDirection::Desc => write!(f, "desc"),
        }
    }
}

/// Case-insensitive substring search, optionally scoped to one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Search {
    pub query: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// What to match and how to order it. Filters are AND-ed exact matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuerySpec {
    pub search: Option<Search>,
    pub filters: BTreeMap<String, String>,
    pub sort: Option<Sort>,
}

impl QuerySpec {
    pub fn search(mut self, query: impl Into<String>, field: Option<&str>) -> Self {
        self.search = Some(Search {
            query: query.into(),
            field: field.map(str::to_string),
        });
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// `true` when any search, filter or sort is requested. An empty search
    /// string still counts: it selects the filtering engines even though it
    /// matches every row.
    pub fn has_criteria(&self) -> bool {
        self.search.is_some() || !self.filters.is_empty() || self.sort.is_some()
    }
}

/// One page of one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
    pub spec: QuerySpec,
}

impl PageRequest {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            spec: QuerySpec::default(),
        }
    }

    pub fn with_spec(mut self, spec: QuerySpec) -> Self {
        self.spec = spec;
        self
    }

    /// Clamps raw numbers into range: negative pages become 0, page sizes are
    /// pulled into `[1, settings.max_size]`.
    pub fn clamped(page: i64, page_size: i64, settings: &PaginationSettings) -> Self {
        let page = page.max(0) as usize;
        let page_size = page_size.clamp(1, settings.max_size.max(1) as i64) as usize;
        Self::new(page, page_size)
    }

    /// Builds a request from loose string parameters, never failing.
    ///
    /// Unparsable numbers fall back to defaults, out-of-range numbers are
    /// clamped and unknown sort directions become ascending. The
    /// `search=<column>&<column>=<value>` form scopes the search to that
    /// column.
    pub fn from_params<'a, I>(params: I, settings: &PaginationSettings) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let params: BTreeMap<&str, &str> = params.into_iter().collect();

        let page = params
            .get("page")
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let page_size = params
            .get("limit")
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(settings.default_size as i64);
        let mut request = Self::clamped(page, page_size, settings);

        let mut query = params.get("search").map(|s| s.to_string());
        let mut field = params.get("field").map(|s| s.to_string());
        if let (Some(q), None) = (&query, &field) {
            if let Some(value) = params.get(q.as_str()) {
                field = Some(q.clone());
                query = Some(value.to_string());
            }
        }

        let mut spec = QuerySpec::default();
        for column in FILTERABLE_COLUMNS {
            if field.as_deref() == Some(*column) && params.get("field").is_none() {
                continue;
            }
            if let Some(value) = params.get(column) {
                spec.filters.insert(column.to_string(), value.to_string());
            }
        }

        if let Some(query) = query {
            spec.search = Some(Search { query, field });
        }

        if let Some(sort_by) = params.get("sort_by").filter(|s| !s.is_empty()) {
            let direction = params
                .get("sort_direction")
                .and_then(|d| d.parse().ok())
                .unwrap_or_default();
            spec.sort = Some(Sort {
                field: sort_by.to_string(),
                direction,
            });
        }

        if spec.search.is_some() || !spec.filters.is_empty() {
            debug!(search = ?spec.search, filters = ?spec.filters, "Parsed search parameters");
        }

        request.spec = spec;
        request
    }

    /// Strict alternative to clamping: rejects out-of-range page sizes.
    pub fn validate(&self, settings: &PaginationSettings) -> Result<(), DatasetError> {
        if self.page_size == 0 {
            return Err(DatasetError::InvalidQuery(
                "page size must be at least 1".to_string(),
            ));
        }
        if self.page_size > settings.max_size {
            return Err(DatasetError::InvalidQuery(format!(
                "page size {} exceeds maximum {}",
                self.page_size, settings.max_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PaginationSettings {
        PaginationSettings {
            default_size: 1000,
            max_size: 5000,
        }
    }

    #[test]
    fn test_clamping() {
        let req = PageRequest::clamped(-3, 0, &settings());
        assert_eq!(req.page, 0);
        assert_eq!(req.page_size, 1);

        let req = PageRequest::clamped(2, 10_000, &settings());
        assert_eq!(req.page, 2);
        assert_eq!(req.page_size, 5000);
    }

    #[test]
    fn test_from_params_defaults() {
        let req = PageRequest::from_params([("page", "abc")], &settings());
        assert_eq!(req.page, 0);
        assert_eq!(req.page_size, 1000);
        assert!(!req.spec.has_criteria());
    }

    #[test]
    fn test_from_params_search_column_form() {
        let req = PageRequest::from_params(
            [("search", "stop_name"), ("stop_name", "gent")],
            &settings(),
        );
        let search = req.spec.search.unwrap();
        assert_eq!(search.query, "gent");
        assert_eq!(search.field.as_deref(), Some("stop_name"));
        assert!(req.spec.filters.is_empty());
    }

    #[test]
    fn test_from_params_filters_and_sort() {
        let req = PageRequest::from_params(
            [
                ("trip_id", "T1"),
                ("unknown_col", "x"),
                ("sort_by", "arrival_time"),
                ("sort_direction", "DESC"),
                ("limit", "20"),
            ],
            &settings(),
        );
        assert_eq!(req.page_size, 20);
        assert_eq!(req.spec.filters.len(), 1);
        assert_eq!(req.spec.filters["trip_id"], "T1");
        let sort = req.spec.sort.unwrap();
        assert_eq!(sort.field, "arrival_time");
        assert_eq!(sort.direction, SortDirection::Desc);
    }

    #[test]
    fn test_unknown_sort_direction_becomes_asc() {
        let req = PageRequest::from_params(
            [("sort_by", "stop_name"), ("sort_direction", "sideways")],
            &settings(),
        );
        assert_eq!(req.spec.sort.unwrap().direction, SortDirection::Asc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_page() {
        let req = PageRequest::new(0, 6000);
        assert!(matches!(
            req.validate(&settings()),
            Err(DatasetError::InvalidQuery(_))
        ));
        assert!(PageRequest::new(0, 10).validate(&settings()).is_ok());
    }
}
