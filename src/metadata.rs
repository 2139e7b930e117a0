//! Field index metadata
//!
//! Answers which fields are forward and/or reverse indexed, optionally
//! restricted to a set of datatypes (an empty datatype set means all).

use std::collections::{BTreeMap, BTreeSet};

/// Source of per-field index metadata
pub trait FieldMetadata: Send + Sync {
    /// Fields present in the forward index for any of the datatypes
    fn indexed_fields(&self, datatypes: &BTreeSet<String>) -> BTreeSet<String>;

    /// Fields present in the reverse index for any of the datatypes
    fn reverse_indexed_fields(&self, datatypes: &BTreeSet<String>) -> BTreeSet<String>;

    fn is_indexed(&self, field: &str, datatypes: &BTreeSet<String>) -> bool {
        self.indexed_fields(datatypes).contains(field)
    }

    fn is_reverse_indexed(&self, field: &str, datatypes: &BTreeSet<String>) -> bool {
        self.reverse_indexed_fields(datatypes).contains(field)
    }
}

/// Fixed, in-memory metadata table
#[derive(Debug, Clone, Default)]
pub struct StaticFieldMetadata {
    // datatype -> fields
    forward: BTreeMap<String, BTreeSet<String>>,
    reverse: BTreeMap<String, BTreeSet<String>>,
}

impl StaticFieldMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `field` as forward indexed for `datatype`
    pub fn with_indexed(mut self, datatype: &str, field: &str) -> Self {
        self.forward
            .entry(datatype.to_string())
            .or_default()
            .insert(field.to_string());
        self
    }

    /// Records `field` as reverse indexed for `datatype`
    pub fn with_reverse_indexed(mut self, datatype: &str, field: &str) -> Self {
        self.reverse
            .entry(datatype.to_string())
            .or_default()
            .insert(field.to_string());
        self
    }

    /// Records `field` as indexed both ways for `datatype`
    pub fn with_both(self, datatype: &str, field: &str) -> Self {
        self.with_indexed(datatype, field)
            .with_reverse_indexed(datatype, field)
    }

    fn collect(
        table: &BTreeMap<String, BTreeSet<String>>,
        datatypes: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        table
            .iter()
            .filter(|(datatype, _)| datatypes.is_empty() || datatypes.contains(*datatype))
            .flat_map(|(_, fields)| fields.iter().cloned())
            .collect()
    }
}

impl FieldMetadata for StaticFieldMetadata {
    fn indexed_fields(&self, datatypes: &BTreeSet<String>) -> BTreeSet<String> {
        Self::collect(&self.forward, datatypes)
    }

    fn reverse_indexed_fields(&self, datatypes: &BTreeSet<String>) -> BTreeSet<String> {
        Self::collect(&self.reverse, datatypes)
    }
}

/// Restricts `requested` to the fields indexed in the chosen direction.
///
/// An empty request resolves to every indexed field (the unfielded case).
pub fn indexed_expansion_fields(
    metadata: &dyn FieldMetadata,
    requested: &BTreeSet<String>,
    reverse_index: bool,
    datatypes: &BTreeSet<String>,
) -> BTreeSet<String> {
    let indexed = if reverse_index {
        metadata.reverse_indexed_fields(datatypes)
    } else {
        metadata.indexed_fields(datatypes)
    };

    if requested.is_empty() {
        indexed
    } else {
        requested.intersection(&indexed).cloned().collect()
    }
}
