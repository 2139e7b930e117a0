//! Forward/reverse index range selection

use regex::Regex;

use crate::config::ExpansionConfig;
use crate::lookup::{DeclineReason, LookupError, LookupResult};
use crate::metadata::FieldMetadata;
use crate::store::{IndexKey, KeyBound, ScanRange, ANY_FIELD, MAX_UNICODE_CHAR, NULL_CHAR};

use super::analyzer::RegexAnalyzer;
use super::literal::LiteralRange;

/// A scan range and the index it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDescription {
    pub range: ScanRange,
    pub is_for_reverse_index: bool,
}

/// How a regex can be served by the global index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeClass {
    /// No anchored literal; the whole forward index must be scanned
    FullTableScan,
    /// Prefix scan of the forward index on the leading literal
    ForwardLiteral(String),
    /// Prefix scan of the reverse index on the (unreversed) trailing literal
    ReverseLiteral(String),
}

/// Chooses index direction and builds scan ranges
pub struct RangeSelector<'a> {
    config: &'a ExpansionConfig,
    metadata: &'a dyn FieldMetadata,
    realm_exclusions: Vec<Regex>,
}

impl<'a> RangeSelector<'a> {
    pub fn new(config: &'a ExpansionConfig, metadata: &'a dyn FieldMetadata) -> Self {
        let realm_exclusions = config
            .realm_suffix_exclusion_patterns
            .iter()
            .filter_map(|exclusion| {
                match Regex::new(&format!("^(.*)(?:{})$", exclusion)) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        tracing::warn!(exclusion = %exclusion, error = %e, "skipping invalid realm exclusion");
                        None
                    }
                }
            })
            .collect();

        Self {
            config,
            metadata,
            realm_exclusions,
        }
    }

    /// Analyzes a pattern, declining it when it cannot be parsed
    pub fn analyze(&self, pattern: &str) -> LookupResult<RegexAnalyzer> {
        RegexAnalyzer::new(pattern).map_err(|e| {
            tracing::debug!(pattern, error = %e, "regex not analyzable");
            LookupError::declined(DeclineReason::UnparseableRegex, pattern)
        })
    }

    /// Forward and reverse indexed-ness of `field` under the datatype
    /// filter. Unfielded lookups assume both.
    ///
    /// A named field indexed in neither direction cannot be looked up.
    pub fn index_directions(&self, field: Option<&str>) -> LookupResult<(bool, bool)> {
        let Some(field) = field.filter(|f| *f != ANY_FIELD) else {
            return Ok((true, true));
        };
        let datatypes = &self.config.datatype_filter;
        match (
            self.metadata.is_indexed(field, datatypes),
            self.metadata.is_reverse_indexed(field, datatypes),
        ) {
            (false, false) => Err(LookupError::NotIndexed(field.to_string())),
            directions => Ok(directions),
        }
    }

    /// Decides whether `analyzer`'s pattern is scanned in the reverse index.
    ///
    /// `field` is `None` (or `_ANYFIELD_`) for unfielded lookups, which
    /// assume the field is indexed both ways.
    pub fn should_use_reverse_index(
        &self,
        analyzer: &RegexAnalyzer,
        field: Option<&str>,
    ) -> LookupResult<bool> {
        let (forward, reverse) = self.index_directions(field)?;

        let (leading, trailing) = match (analyzer.leading_literal(), analyzer.trailing_literal()) {
            (Some(_), None) | (None, None) => return Ok(false),
            (None, Some(_)) => return Ok(true),
            (Some(leading), Some(trailing)) => (leading, trailing),
        };

        match (forward, reverse) {
            (false, _) => Ok(true),
            (true, false) => Ok(false),
            (true, true) => {
                let trimmed = self.trim_realm(trailing);
                Ok(leading.chars().count() < trimmed.chars().count())
            }
        }
    }

    /// Classifies `pattern`, declining it when neither end is anchored and
    /// full-table scans are disabled
    pub fn classify_range(&self, field: Option<&str>, pattern: &str) -> LookupResult<RangeClass> {
        let analyzer = self.analyze(pattern)?;
        self.index_directions(field)?;

        if analyzer.is_ngram() {
            if self.config.full_table_scan_enabled {
                return Ok(RangeClass::FullTableScan);
            }
            return Err(LookupError::declined(
                DeclineReason::WildcardsBothSides,
                pattern,
            ));
        }

        if self.should_use_reverse_index(&analyzer, field)? {
            let trailing = analyzer.trailing_literal().unwrap_or_default();
            Ok(RangeClass::ReverseLiteral(trailing.to_string()))
        } else {
            let leading = analyzer.leading_literal().unwrap_or_default();
            Ok(RangeClass::ForwardLiteral(leading.to_string()))
        }
    }

    /// Scan range for a regex in the index chosen for it
    pub fn regex_range(&self, field: Option<&str>, pattern: &str) -> LookupResult<RangeDescription> {
        let description = match self.classify_range(field, pattern)? {
            RangeClass::FullTableScan => RangeDescription {
                range: ScanRange::full(),
                is_for_reverse_index: false,
            },
            RangeClass::ForwardLiteral(leading) => RangeDescription {
                range: prefix_range(&leading),
                is_for_reverse_index: false,
            },
            RangeClass::ReverseLiteral(trailing) => {
                let reversed: String = trailing.chars().rev().collect();
                RangeDescription {
                    range: prefix_range(&reversed),
                    is_for_reverse_index: true,
                }
            }
        };

        tracing::debug!(
            pattern,
            range = %description.range,
            reverse = description.is_for_reverse_index,
            "selected regex range"
        );
        Ok(description)
    }

    /// Strips the first matching realm suffix from a trailing literal
    pub fn trim_realm(&self, literal: &str) -> String {
        self.realm_exclusions
            .iter()
            .find_map(|regex| {
                regex
                    .captures(literal)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .unwrap_or_else(|| literal.to_string())
    }
}

/// Scan range covering every row that starts with `literal`
fn prefix_range(literal: &str) -> ScanRange {
    ScanRange::new(
        KeyBound::inclusive(IndexKey::row_only(literal)),
        KeyBound::exclusive(IndexKey::row_only(format!("{}{}", literal, MAX_UNICODE_CHAR))),
    )
}

/// Scan range for a bounded literal range.
///
/// An inclusive upper bound extends to `upper + U+10FFFF` so every entry of
/// the upper row is covered.
pub fn build_range(literal_range: &LiteralRange) -> LookupResult<ScanRange> {
    let start = if literal_range.is_lower_inclusive() {
        KeyBound::inclusive(IndexKey::row_only(literal_range.lower()))
    } else {
        KeyBound::inclusive(IndexKey::row_only(format!(
            "{}{}",
            literal_range.lower(),
            NULL_CHAR
        )))
    };

    let end = if literal_range.is_upper_inclusive() {
        KeyBound::inclusive(IndexKey::row_only(format!(
            "{}{}",
            literal_range.upper(),
            MAX_UNICODE_CHAR
        )))
    } else {
        KeyBound::exclusive(IndexKey::row_only(literal_range.upper()))
    };

    if start.key > end.key || (start.key == end.key && !(start.inclusive && end.inclusive)) {
        return Err(LookupError::InvalidRange(format!(
            "{} yields start {} after end {}",
            literal_range, start.key, end.key
        )));
    }

    Ok(ScanRange::new(start, end))
}

/// Scan range for one literal term, restricted to `field` when given
pub fn literal_range(field: Option<&str>, term: &str) -> ScanRange {
    match field.filter(|f| *f != ANY_FIELD) {
        Some(field) => ScanRange::exact_row_family(term, field),
        None => ScanRange::exact_row(term),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StaticFieldMetadata;

    fn metadata() -> StaticFieldMetadata {
        StaticFieldMetadata::new()
            .with_both("csv", "BOTH")
            .with_indexed("csv", "FWD")
            .with_reverse_indexed("csv", "REV")
    }

    fn reverse_for(config: &ExpansionConfig, field: Option<&str>, pattern: &str) -> LookupResult<bool> {
        let md = metadata();
        let selector = RangeSelector::new(config, &md);
        let analyzer = selector.analyze(pattern)?;
        selector.should_use_reverse_index(&analyzer, field)
    }

    #[test]
    fn test_leading_only_is_forward() {
        let config = ExpansionConfig::default();
        assert!(!reverse_for(&config, Some("REV"), "examp.*").unwrap());
    }

    #[test]
    fn test_trailing_only_is_reverse_regardless_of_metadata() {
        let config = ExpansionConfig::default();
        assert!(reverse_for(&config, Some("FWD"), ".*ample").unwrap());
        assert!(reverse_for(&config, None, "*ample").unwrap());
    }

    #[test]
    fn test_both_literals_consult_metadata() {
        let config = ExpansionConfig::default();
        assert!(!reverse_for(&config, Some("FWD"), "e.*ample").unwrap());
        assert!(reverse_for(&config, Some("REV"), "examp.*e").unwrap());

        let err = reverse_for(&config, Some("MISSING"), "ex.*le").unwrap_err();
        assert_eq!(err.code(), "EXPAND_NOT_INDEXED");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unindexed_field_rejected_for_any_anchoring() {
        let config = ExpansionConfig::default();
        for pattern in ["examp.*", ".*ample"] {
            let err = reverse_for(&config, Some("MISSING"), pattern).unwrap_err();
            assert_eq!(err.code(), "EXPAND_NOT_INDEXED");
        }

        let mut config = ExpansionConfig::default();
        config.full_table_scan_enabled = true;
        let md = metadata();
        let selector = RangeSelector::new(&config, &md);
        let err = selector.classify_range(Some("MISSING"), ".*mid.*").unwrap_err();
        assert!(matches!(err, LookupError::NotIndexed(ref f) if f == "MISSING"));
        assert!(selector.classify_range(Some("FWD"), ".*mid.*").is_ok());
    }

    #[test]
    fn test_both_literals_longer_side_wins() {
        let config = ExpansionConfig::default();
        assert!(reverse_for(&config, Some("BOTH"), "e.*ample").unwrap());
        assert!(!reverse_for(&config, Some("BOTH"), "examp.*e").unwrap());
        // ties keep the forward index
        assert!(!reverse_for(&config, None, "ex.*le").unwrap());
    }

    #[test]
    fn test_realm_suffix_is_ignored_when_comparing() {
        let mut config = ExpansionConfig::default();
        config.realm_suffix_exclusion_patterns = vec!["@example\\.com".into()];
        // "bob@example.com" trims to "bob", shorter than "smith"
        assert!(!reverse_for(&config, None, "smith.*bob@example\\.com").unwrap());

        let md = metadata();
        let selector = RangeSelector::new(&config, &md);
        assert_eq!(selector.trim_realm("bob@example.com"), "bob");
        assert_eq!(selector.trim_realm("bob@other.org"), "bob@other.org");
    }

    #[test]
    fn test_ngram_declined_unless_full_table_scans() {
        let md = metadata();
        let config = ExpansionConfig::default();
        let selector = RangeSelector::new(&config, &md);
        let err = selector.classify_range(None, ".*mid.*").unwrap_err();
        assert!(err.is_decline());

        let mut config = ExpansionConfig::default();
        config.full_table_scan_enabled = true;
        let selector = RangeSelector::new(&config, &md);
        assert_eq!(
            selector.classify_range(None, ".*mid.*").unwrap(),
            RangeClass::FullTableScan
        );
        let description = selector.regex_range(None, ".*mid.*").unwrap();
        assert!(description.range.is_full());
        assert!(!description.is_for_reverse_index);
    }

    #[test]
    fn test_unparseable_regex_declined() {
        let md = metadata();
        let config = ExpansionConfig::default();
        let selector = RangeSelector::new(&config, &md);
        let err = selector.classify_range(None, "(abc").unwrap_err();
        assert!(matches!(
            err,
            LookupError::Declined {
                reason: DeclineReason::UnparseableRegex,
                ..
            }
        ));
    }

    #[test]
    fn test_regex_ranges() {
        let md = metadata();
        let config = ExpansionConfig::default();
        let selector = RangeSelector::new(&config, &md);

        let forward = selector.regex_range(Some("BOTH"), "examp.*").unwrap();
        assert!(!forward.is_for_reverse_index);
        assert!(forward.range.contains(&IndexKey::new("example", "BOTH", "x")));
        assert!(!forward.range.contains(&IndexKey::new("exam", "BOTH", "x")));

        let reverse = selector.regex_range(Some("BOTH"), ".*ample").unwrap();
        assert!(reverse.is_for_reverse_index);
        let start = reverse.range.start.as_ref().unwrap();
        assert_eq!(start.key.row, "elpma");
        assert!(start.inclusive);
        assert!(reverse.range.contains(&IndexKey::new("elpmaxe", "BOTH", "x")));
    }

    #[test]
    fn test_build_range_inclusivity() {
        let range = build_range(&LiteralRange::new("F", "A", true, "M", false)).unwrap();
        let start = range.start.as_ref().unwrap();
        let end = range.end.as_ref().unwrap();
        assert_eq!(start.key, IndexKey::row_only("A"));
        assert!(start.inclusive);
        assert_eq!(end.key, IndexKey::row_only("M"));
        assert!(!end.inclusive);

        let range = build_range(&LiteralRange::new("F", "A", false, "M", true)).unwrap();
        let start = range.start.as_ref().unwrap();
        let end = range.end.as_ref().unwrap();
        assert_eq!(start.key, IndexKey::row_only("A\0"));
        assert!(start.inclusive);
        assert_eq!(end.key, IndexKey::row_only(format!("M{}", MAX_UNICODE_CHAR)));
        assert!(end.inclusive);

        assert!(range.contains(&IndexKey::new("M", "F", "20240101_0\0csv")));
        assert!(!range.contains(&IndexKey::new("A", "F", "20240101_0\0csv")));
    }

    #[test]
    fn test_build_range_rejects_inverted_bounds() {
        let err = build_range(&LiteralRange::new("F", "M", true, "A", true)).unwrap_err();
        assert_eq!(err.code(), "EXPAND_INVALID_RANGE");

        let err = build_range(&LiteralRange::new("F", "A", true, "A", false)).unwrap_err();
        assert_eq!(err.code(), "EXPAND_INVALID_RANGE");

        assert!(build_range(&LiteralRange::new("F", "A", true, "A", true)).is_ok());
    }

    #[test]
    fn test_literal_range() {
        let fielded = literal_range(Some("NAME"), "bob");
        assert!(fielded.contains(&IndexKey::new("bob", "NAME", "x")));
        assert!(!fielded.contains(&IndexKey::new("bob", "CITY", "x")));

        let unfielded = literal_range(Some(ANY_FIELD), "bob");
        assert!(unfielded.contains(&IndexKey::new("bob", "CITY", "x")));
    }
}
