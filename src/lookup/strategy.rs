//! Expansion strategies
//!
//! A strategy decides what an `ExpansionTask` scans and how each streamed
//! entry becomes a (field, value) pair. The streaming loop, thresholds and
//! timeout handling are shared by every strategy.

use std::collections::BTreeSet;
use std::fmt;

use crate::config::ExpansionConfig;
use crate::range::{
    build_filter_stack, build_range, fairness_filters, literal_range, LiteralRange, RangeSelector,
};
use crate::store::{IndexEntry, ScanRange, ScanRequest, NO_FIELD};

use super::errors::{DeclineReason, LookupError, LookupResult};

/// One scan session to open: table, request and index direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBatch {
    pub table: String,
    pub request: ScanRequest,
    pub reverse_index: bool,
}

impl ScanBatch {
    fn forward(config: &ExpansionConfig, request: ScanRequest) -> Self {
        Self {
            table: config.index_table_name.clone(),
            request,
            reverse_index: false,
        }
    }

    fn reverse(config: &ExpansionConfig, request: ScanRequest) -> Self {
        Self {
            table: config.reverse_index_table_name.clone(),
            request,
            reverse_index: true,
        }
    }
}

/// What an expansion task scans and how it reads entries
pub trait ExpansionStrategy: Send + Sync + fmt::Debug + 'static {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Source patterns or terms, recorded on the result map
    fn patterns(&self) -> BTreeSet<String>;

    /// Fields the lookup targets
    fn target_fields(&self) -> &BTreeSet<String>;

    /// Fields a scan of the forward or reverse index can return
    fn scan_fields(&self, _reverse_index: bool) -> &BTreeSet<String> {
        self.target_fields()
    }

    /// Fielded lookups mark their fields on overflow; unfielded ones poison
    /// the whole map
    fn is_fielded(&self) -> bool;

    /// Scan sessions to open, in the order they are streamed
    fn plan(
        &self,
        config: &ExpansionConfig,
        selector: &RangeSelector<'_>,
    ) -> LookupResult<Vec<ScanBatch>>;

    /// Converts a streamed entry into (field, value)
    fn extract(&self, entry: &IndexEntry, reverse_index: bool) -> LookupResult<(String, String)>;
}

fn finish_request(
    config: &ExpansionConfig,
    ranges: Vec<ScanRange>,
    column_families: &BTreeSet<String>,
    literals: &BTreeSet<String>,
    patterns: &BTreeSet<String>,
    reverse_index: bool,
    unique_terms_only: bool,
) -> ScanRequest {
    let mut request = ScanRequest::new(ranges);
    for family in column_families {
        request.fetch_column_family(family.as_str());
    }
    request.with_filters(
        build_filter_stack(
            config,
            literals,
            patterns,
            &config.datatype_filter,
            reverse_index,
            unique_terms_only,
        )
        .into_iter()
        .chain(fairness_filters(config)),
    )
}

// ==================================================================================
// Bounded range
// ==================================================================================

/// Values of one field within a literal range
#[derive(Debug, Clone)]
pub struct BoundedRangeStrategy {
    range: LiteralRange,
    fields: BTreeSet<String>,
}

impl BoundedRangeStrategy {
    pub fn new(range: LiteralRange) -> Self {
        let fields = std::iter::once(range.field().to_string()).collect();
        Self { range, fields }
    }

    pub fn range(&self) -> &LiteralRange {
        &self.range
    }
}

impl ExpansionStrategy for BoundedRangeStrategy {
    fn kind(&self) -> &'static str {
        "bounded_range"
    }

    fn patterns(&self) -> BTreeSet<String> {
        std::iter::once(self.range.to_string()).collect()
    }

    fn target_fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    fn is_fielded(&self) -> bool {
        true
    }

    fn plan(
        &self,
        config: &ExpansionConfig,
        _selector: &RangeSelector<'_>,
    ) -> LookupResult<Vec<ScanBatch>> {
        let range = build_range(&self.range)?;
        let request = finish_request(
            config,
            vec![range],
            &self.fields,
            &BTreeSet::new(),
            &BTreeSet::new(),
            false,
            false,
        );
        Ok(vec![ScanBatch::forward(config, request)])
    }

    fn extract(&self, entry: &IndexEntry, _reverse_index: bool) -> LookupResult<(String, String)> {
        if entry.key.column_family != self.range.field() {
            return Err(LookupError::Inconsistent(format!(
                "range lookup on {} returned an entry for field {}",
                self.range,
                entry.key.column_family
            )));
        }
        Ok((entry.key.column_family.clone(), entry.key.row.clone()))
    }
}

// ==================================================================================
// Field-name discovery
// ==================================================================================

/// Fields in which any of the literal terms occur
#[derive(Debug, Clone)]
pub struct FieldNameStrategy {
    terms: BTreeSet<String>,
    candidate_fields: BTreeSet<String>,
}

impl FieldNameStrategy {
    /// `terms` holds the term and its normalized variants. An empty
    /// candidate set fetches `_NOFIELD_`, which matches nothing.
    pub fn new(terms: BTreeSet<String>, candidate_fields: BTreeSet<String>) -> Self {
        Self {
            terms,
            candidate_fields,
        }
    }
}

impl ExpansionStrategy for FieldNameStrategy {
    fn kind(&self) -> &'static str {
        "field_name"
    }

    fn patterns(&self) -> BTreeSet<String> {
        self.terms.clone()
    }

    fn target_fields(&self) -> &BTreeSet<String> {
        &self.candidate_fields
    }

    fn is_fielded(&self) -> bool {
        false
    }

    fn plan(
        &self,
        config: &ExpansionConfig,
        _selector: &RangeSelector<'_>,
    ) -> LookupResult<Vec<ScanBatch>> {
        let ranges = self
            .terms
            .iter()
            .map(|term| literal_range(None, term))
            .collect();

        let families = if self.candidate_fields.is_empty() {
            std::iter::once(NO_FIELD.to_string()).collect()
        } else {
            self.candidate_fields.clone()
        };

        let request = finish_request(
            config,
            ranges,
            &families,
            &self.terms,
            &BTreeSet::new(),
            false,
            false,
        );
        Ok(vec![ScanBatch::forward(config, request)])
    }

    fn extract(&self, entry: &IndexEntry, _reverse_index: bool) -> LookupResult<(String, String)> {
        Ok((entry.key.column_family.clone(), entry.key.row.clone()))
    }
}

// ==================================================================================
// Regex terms
// ==================================================================================

/// Values matching one or more regexes, through the forward and/or reverse
/// index
#[derive(Debug, Clone)]
pub struct RegexTermStrategy {
    patterns: BTreeSet<String>,
    fields: BTreeSet<String>,
    reverse_fields: BTreeSet<String>,
    fielded: bool,
}

impl RegexTermStrategy {
    /// Values of a single named field
    pub fn for_field(field: &str, patterns: BTreeSet<String>) -> Self {
        let fields: BTreeSet<String> = std::iter::once(field.to_string()).collect();
        Self {
            patterns,
            reverse_fields: fields.clone(),
            fields,
            fielded: true,
        }
    }

    /// Fields (and values) matching an unfielded regex. `fields` and
    /// `reverse_fields` are the forward and reverse indexed expansion fields.
    pub fn unfielded(
        patterns: BTreeSet<String>,
        fields: BTreeSet<String>,
        reverse_fields: BTreeSet<String>,
    ) -> Self {
        Self {
            patterns,
            fields,
            reverse_fields,
            fielded: false,
        }
    }

    fn field_hint(&self) -> Option<&str> {
        if self.fielded {
            self.fields.iter().next().map(String::as_str)
        } else {
            None
        }
    }
}

impl ExpansionStrategy for RegexTermStrategy {
    fn kind(&self) -> &'static str {
        "regex_term"
    }

    fn patterns(&self) -> BTreeSet<String> {
        self.patterns.clone()
    }

    fn target_fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    fn scan_fields(&self, reverse_index: bool) -> &BTreeSet<String> {
        if reverse_index {
            &self.reverse_fields
        } else {
            &self.fields
        }
    }

    fn is_fielded(&self) -> bool {
        self.fielded
    }

    fn plan(
        &self,
        config: &ExpansionConfig,
        selector: &RangeSelector<'_>,
    ) -> LookupResult<Vec<ScanBatch>> {
        if let Some(pattern) = self
            .patterns
            .iter()
            .find(|p| config.disallowed_regex_patterns.contains(*p))
        {
            tracing::info!(pattern = %pattern, "ignoring disallowed pattern for index lookup");
            return Err(LookupError::declined(DeclineReason::DisallowedPattern, pattern));
        }

        let mut forward_ranges = Vec::new();
        let mut forward_patterns = BTreeSet::new();
        let mut reverse_ranges = Vec::new();
        let mut reverse_patterns = BTreeSet::new();

        for pattern in &self.patterns {
            let description = match selector.regex_range(self.field_hint(), pattern) {
                Ok(description) => description,
                Err(LookupError::Declined {
                    reason: DeclineReason::UnparseableRegex,
                    ..
                }) => {
                    tracing::debug!(pattern = %pattern, "skipping unparseable pattern");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if description.is_for_reverse_index {
                reverse_ranges.push(description.range);
                reverse_patterns.insert(pattern.clone());
            } else {
                forward_ranges.push(description.range);
                forward_patterns.insert(pattern.clone());
            }
        }

        if forward_ranges.is_empty() && reverse_ranges.is_empty() {
            let joined = self.patterns.iter().cloned().collect::<Vec<_>>().join(" || ");
            return Err(LookupError::declined(DeclineReason::UnparseableRegex, joined));
        }

        let mut batches = Vec::new();
        if !forward_ranges.is_empty() && !self.fields.is_empty() {
            let request = finish_request(
                config,
                forward_ranges,
                &self.fields,
                &BTreeSet::new(),
                &forward_patterns,
                false,
                true,
            );
            batches.push(ScanBatch::forward(config, request));
        }
        if !reverse_ranges.is_empty() && !self.reverse_fields.is_empty() {
            let request = finish_request(
                config,
                reverse_ranges,
                &self.reverse_fields,
                &BTreeSet::new(),
                &reverse_patterns,
                true,
                true,
            );
            batches.push(ScanBatch::reverse(config, request));
        }
        Ok(batches)
    }

    fn extract(&self, entry: &IndexEntry, reverse_index: bool) -> LookupResult<(String, String)> {
        let value = if reverse_index {
            entry.key.row.chars().rev().collect()
        } else {
            entry.key.row.clone()
        };
        Ok((entry.key.column_family.clone(), value))
    }
}
