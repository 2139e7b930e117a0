//! Per-query cache of completed expansions
//!
//! Remembers which literal values each field has already expanded to, so
//! the predicate layer can skip re-expanding a term it has seen. Append-only
//! for the life of one query; poisoned maps are never recorded.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use super::result_map::BoundedResultMap;

/// Field -> distinct value sets seen so far
#[derive(Debug, Default)]
pub struct ExpansionCache {
    entries: RwLock<HashMap<String, Vec<BTreeSet<String>>>>,
}

impl ExpansionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any cached expansion of `field` contains `literal`
    pub fn contains_expansions_for(&self, field: &str, literal: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(field)
            .map(|sets| sets.iter().any(|values| values.contains(literal)))
            .unwrap_or(false)
    }

    /// Records every field of `map`, skipping value sets already cached.
    ///
    /// A poisoned map carries no usable contents and is ignored.
    pub fn add_expansion(&self, map: &BoundedResultMap) {
        let fields = match map.iter() {
            Ok(fields) => fields,
            Err(_) => {
                tracing::trace!(patterns = ?map.patterns(), "not caching overflowed expansion");
                return;
            }
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (field, values) in fields {
            let sets = entries.entry(field.clone()).or_default();
            if !sets.iter().any(|existing| existing == values.values()) {
                sets.push(values.values().clone());
            }
        }
    }

    /// Distinct value sets cached for `field`
    pub fn expansions_for(&self, field: &str) -> Vec<BTreeSet<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(field).cloned().unwrap_or_default()
    }

    /// Number of cached fields
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
