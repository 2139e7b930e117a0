//! Scan range selection
//!
//! Turns patterns, literal ranges and literal terms into scan ranges over
//! the forward or reverse global index, plus the filter stack each scan
//! carries.
//!
//! # Index direction
//!
//! A pattern anchored only at its start scans the forward index; one
//! anchored only at its end scans the reverse index (rows stored reversed).
//! When both ends are anchored the longer literal wins, after stripping
//! configured realm suffixes, and ties keep the forward index. Patterns
//! anchored at neither end need a full-table scan, which is declined
//! unless explicitly enabled.

mod analyzer;
mod filters;
mod literal;
mod selector;

pub use analyzer::{RegexAnalyzer, RegexParseError};
pub use filters::{
    build_filter_stack, datatype_filter, date_range_filter, fairness_filters,
    term_matching_filter, DATATYPE_FILTER_OFFSET, DATE_FILTER_OFFSET, FAIRNESS_PRIORITY,
    TERM_MATCH_FILTER_OFFSET, TIMEOUT_SENTINEL_OFFSET,
};
pub use literal::LiteralRange;
pub use selector::{build_range, literal_range, RangeClass, RangeDescription, RangeSelector};
