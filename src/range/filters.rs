//! Server-side filter stacks for index scans
//!
//! Priorities are offsets from `base_iterator_priority`, except the
//! fairness filter which always runs first.

use std::collections::BTreeSet;

use crate::config::ExpansionConfig;
use crate::store::{FilterDescriptor, FilterKind, MAX_UNICODE_CHAR};

pub const DATE_FILTER_OFFSET: u32 = 21;
pub const DATATYPE_FILTER_OFFSET: u32 = 22;
pub const TERM_MATCH_FILTER_OFFSET: u32 = 24;
pub const TIMEOUT_SENTINEL_OFFSET: u32 = 100;
pub const FAIRNESS_PRIORITY: u32 = 1;

/// Restricts entries to shards between the configured dates
pub fn date_range_filter(config: &ExpansionConfig) -> FilterDescriptor {
    FilterDescriptor::new(
        config.base_iterator_priority + DATE_FILTER_OFFSET,
        "dateFilter",
        FilterKind::DateRange {
            begin: config.begin_shard_date(),
            // covers every shard suffix of the end date
            end: format!("{}{}", config.end_shard_date(), MAX_UNICODE_CHAR),
        },
    )
}

/// Restricts entries to the given datatypes, `None` when the set is empty
pub fn datatype_filter(
    config: &ExpansionConfig,
    datatypes: &BTreeSet<String>,
) -> Option<FilterDescriptor> {
    if datatypes.is_empty() {
        return None;
    }
    Some(FilterDescriptor::new(
        config.base_iterator_priority + DATATYPE_FILTER_OFFSET,
        "dataTypeFilter",
        FilterKind::Datatype {
            datatypes: datatypes.clone(),
        },
    ))
}

/// Matches rows against literals and patterns, `None` when both are empty
pub fn term_matching_filter(
    config: &ExpansionConfig,
    literals: &BTreeSet<String>,
    patterns: &BTreeSet<String>,
    reverse_index: bool,
    unique_terms_only: bool,
) -> Option<FilterDescriptor> {
    if literals.is_empty() && patterns.is_empty() {
        return None;
    }
    Some(FilterDescriptor::new(
        config.base_iterator_priority + TERM_MATCH_FILTER_OFFSET,
        "termMatcher",
        FilterKind::TermMatch {
            literals: literals.clone(),
            patterns: patterns.clone(),
            reverse_index,
            unique_terms_in_field: unique_terms_only,
        },
    ))
}

/// Ordered filter stack: date range, then datatype, then term matching
pub fn build_filter_stack(
    config: &ExpansionConfig,
    literals: &BTreeSet<String>,
    patterns: &BTreeSet<String>,
    datatypes: &BTreeSet<String>,
    reverse_index: bool,
    unique_terms_only: bool,
) -> Vec<FilterDescriptor> {
    let mut stack = vec![date_range_filter(config)];
    stack.extend(datatype_filter(config, datatypes));
    stack.extend(term_matching_filter(
        config,
        literals,
        patterns,
        reverse_index,
        unique_terms_only,
    ));
    stack
}

/// Fairness cut-off plus its sentinel, only when a scan budget is set.
///
/// Sessions may run for twice the caller's budget before the store ends
/// them; the caller's own timeout normally fires first.
pub fn fairness_filters(config: &ExpansionConfig) -> Vec<FilterDescriptor> {
    let budget = match config.max_index_scan_time() {
        Some(budget) => budget,
        None => return Vec::new(),
    };

    vec![
        FilterDescriptor::new(
            FAIRNESS_PRIORITY,
            "fairness",
            FilterKind::Fairness {
                max_session_time: budget * 2,
            },
        ),
        FilterDescriptor::new(
            config.base_iterator_priority + TIMEOUT_SENTINEL_OFFSET,
            "timeoutSentinel",
            FilterKind::TimeoutSentinel,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_minimal_stack_is_date_only() {
        let config = ExpansionConfig::default();
        let stack = build_filter_stack(
            &config,
            &BTreeSet::new(),
            &BTreeSet::new(),
            &BTreeSet::new(),
            false,
            false,
        );
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].name, "dateFilter");
        assert_eq!(stack[0].priority, 121);
    }

    #[test]
    fn test_full_stack_order_and_priorities() {
        let mut config = ExpansionConfig::default();
        config.begin_date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        config.end_date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        let stack = build_filter_stack(
            &config,
            &set(&["foo"]),
            &set(&["fo.*"]),
            &set(&["csv"]),
            true,
            true,
        );

        let names: Vec<_> = stack.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["dateFilter", "dataTypeFilter", "termMatcher"]);
        let priorities: Vec<_> = stack.iter().map(|f| f.priority).collect();
        assert_eq!(priorities, vec![121, 122, 124]);

        assert_eq!(
            stack[0].kind,
            FilterKind::DateRange {
                begin: "20240301".into(),
                end: format!("20240302{}", MAX_UNICODE_CHAR),
            }
        );
        match &stack[2].kind {
            FilterKind::TermMatch {
                reverse_index,
                unique_terms_in_field,
                ..
            } => {
                assert!(*reverse_index);
                assert!(*unique_terms_in_field);
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_fairness_pair_requires_budget() {
        let unbounded = ExpansionConfig::default().with_max_index_scan_time_ms(-1);
        assert!(fairness_filters(&unbounded).is_empty());

        let bounded = ExpansionConfig::default().with_max_index_scan_time_ms(50);
        let pair = fairness_filters(&bounded);
        assert_eq!(pair.len(), 2);
        assert_eq!(pair[0].priority, FAIRNESS_PRIORITY);
        assert_eq!(
            pair[0].kind,
            FilterKind::Fairness {
                max_session_time: Duration::from_millis(100)
            }
        );
        assert_eq!(pair[1].priority, 200);
        assert_eq!(pair[1].kind, FilterKind::TimeoutSentinel);
    }
}
