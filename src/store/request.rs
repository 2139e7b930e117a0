//! Scan requests and server-side filter descriptors

use std::collections::BTreeSet;
use std::time::Duration;

use super::key::ScanRange;

/// A server-side filter the store applies while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    /// Ends the session once it has run longer than `max_session_time`
    Fairness { max_session_time: Duration },
    /// Accepts qualifiers whose shard id falls in `[begin, end]`
    DateRange { begin: String, end: String },
    /// Accepts qualifiers whose datatype tag is in the set
    Datatype { datatypes: BTreeSet<String> },
    /// Accepts rows equal to a literal or fully matching a pattern
    TermMatch {
        literals: BTreeSet<String>,
        patterns: BTreeSet<String>,
        reverse_index: bool,
        unique_terms_in_field: bool,
    },
    /// Turns a fairness cut-off into a sentinel entry instead of a silent end
    TimeoutSentinel,
}

/// A filter with its position in the store's filter stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub priority: u32,
    pub name: &'static str,
    pub kind: FilterKind,
}

impl FilterDescriptor {
    pub fn new(priority: u32, name: &'static str, kind: FilterKind) -> Self {
        Self {
            priority,
            name,
            kind,
        }
    }
}

/// Everything a scan session needs: ranges, column families, filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub ranges: Vec<ScanRange>,
    pub column_families: BTreeSet<String>,
    pub filters: Vec<FilterDescriptor>,
}

impl ScanRequest {
    pub fn new(ranges: Vec<ScanRange>) -> Self {
        Self {
            ranges,
            ..Default::default()
        }
    }

    /// Restricts the scan to a column family (repeatable)
    pub fn fetch_column_family(&mut self, family: impl Into<String>) {
        self.column_families.insert(family.into());
    }

    /// Adds a filter, keeping the stack ordered by priority.
    ///
    /// Filters with equal priority keep insertion order.
    pub fn add_filter(&mut self, filter: FilterDescriptor) {
        let pos = self
            .filters
            .iter()
            .position(|f| f.priority > filter.priority)
            .unwrap_or(self.filters.len());
        self.filters.insert(pos, filter);
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = FilterDescriptor>) -> Self {
        for filter in filters {
            self.add_filter(filter);
        }
        self
    }

    /// Whether the column family passes the family restriction
    pub fn accepts_family(&self, family: &str) -> bool {
        self.column_families.is_empty() || self.column_families.contains(family)
    }
}
