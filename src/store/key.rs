//! Index keys, entries and scan ranges
//!
//! Global index layout:
//!
//! - row: the term (reversed in the reverse index)
//! - column family: the field name
//! - column qualifier: `<shard>\0<datatype>`, where shard is `yyyyMMdd_n`
//!
//! Keys order by (row, column family, column qualifier). A key with empty
//! family and qualifier sorts before every entry of its row.

use std::fmt;

/// Separator between shard id and datatype in a column qualifier
pub const NULL_CHAR: char = '\0';

/// Highest code point, appended to a literal to cover everything it prefixes
pub const MAX_UNICODE_CHAR: char = '\u{10FFFF}';

/// Column family fetched when no expansion field is indexed
pub const NO_FIELD: &str = "_NOFIELD_";

/// Field name used by the predicate layer for unfielded terms
pub const ANY_FIELD: &str = "_ANYFIELD_";

/// Value of the sentinel entry a fairness filter emits when a scan overruns
pub const EXCEEDED_TIMEOUT_VALUE: &[u8] = b"!!EXCEEDED_TIMEOUT!!";

/// Key of an index entry
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey {
    pub row: String,
    pub column_family: String,
    pub column_qualifier: String,
}

impl IndexKey {
    /// Creates a full key
    pub fn new(
        row: impl Into<String>,
        column_family: impl Into<String>,
        column_qualifier: impl Into<String>,
    ) -> Self {
        Self {
            row: row.into(),
            column_family: column_family.into(),
            column_qualifier: column_qualifier.into(),
        }
    }

    /// Key addressing the start of a row
    pub fn row_only(row: impl Into<String>) -> Self {
        Self::new(row, "", "")
    }

    /// Builds the column qualifier for a shard and datatype
    pub fn qualifier(shard: &str, datatype: &str) -> String {
        format!("{}{}{}", shard, NULL_CHAR, datatype)
    }

    /// Shard id portion of the qualifier
    pub fn shard(&self) -> &str {
        match self.column_qualifier.find(NULL_CHAR) {
            Some(idx) => &self.column_qualifier[..idx],
            None => &self.column_qualifier,
        }
    }

    /// Datatype tag embedded in the qualifier, if any
    pub fn datatype(&self) -> Option<&str> {
        self.column_qualifier
            .find(NULL_CHAR)
            .map(|idx| &self.column_qualifier[idx + NULL_CHAR.len_utf8()..])
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}",
            self.row,
            self.column_family,
            self.column_qualifier.replace(NULL_CHAR, "\\x00")
        )
    }
}

/// A key/value pair streamed from a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: IndexKey,
    pub value: Vec<u8>,
}

impl IndexEntry {
    pub fn new(key: IndexKey, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Sentinel entry signalling that the scan ran past its session budget
    pub fn timeout_sentinel(key: IndexKey) -> Self {
        Self::new(key, EXCEEDED_TIMEOUT_VALUE)
    }

    pub fn is_timeout_sentinel(&self) -> bool {
        self.value == EXCEEDED_TIMEOUT_VALUE
    }
}

/// One end of a scan range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBound {
    pub key: IndexKey,
    pub inclusive: bool,
}

impl KeyBound {
    pub fn inclusive(key: IndexKey) -> Self {
        Self {
            key,
            inclusive: true,
        }
    }

    pub fn exclusive(key: IndexKey) -> Self {
        Self {
            key,
            inclusive: false,
        }
    }
}

/// A key range to scan. Missing bounds are infinite.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanRange {
    pub start: Option<KeyBound>,
    pub end: Option<KeyBound>,
}

impl ScanRange {
    /// Range covering the whole table
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(start: KeyBound, end: KeyBound) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Range over every entry of one row
    pub fn exact_row(row: &str) -> Self {
        Self::new(
            KeyBound::inclusive(IndexKey::row_only(row)),
            KeyBound::exclusive(IndexKey::row_only(format!("{}{}", row, NULL_CHAR))),
        )
    }

    /// Range over one row restricted to one column family
    pub fn exact_row_family(row: &str, family: &str) -> Self {
        Self::new(
            KeyBound::inclusive(IndexKey::new(row, family, "")),
            KeyBound::exclusive(IndexKey::new(row, format!("{}{}", family, NULL_CHAR), "")),
        )
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Returns whether `key` falls within this range
    pub fn contains(&self, key: &IndexKey) -> bool {
        if let Some(start) = &self.start {
            if key < &start.key || (!start.inclusive && key == &start.key) {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key > &end.key || (!end.inclusive && key == &end.key) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            Some(b) if b.inclusive => write!(f, "[{}", b.key)?,
            Some(b) => write!(f, "({}", b.key)?,
            None => write!(f, "(-inf")?,
        }
        match &self.end {
            Some(b) if b.inclusive => write!(f, ", {}]", b.key),
            Some(b) => write!(f, ", {})", b.key),
            None => write!(f, ", +inf)"),
        }
    }
}
