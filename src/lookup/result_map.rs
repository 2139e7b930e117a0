//! Bounded result map for index expansions
//!
//! Maps field name to a capped `ValueSet`. Two independent overflow signals:
//!
//! - per field: a `ValueSet` past the value threshold stops accepting values
//!   and raises its own flag, keeping what it already collected
//! - per map: adding a field past the key threshold clears every field and
//!   poisons the map
//!
//! Poisoning is one-way. A poisoned map only answers whether it is poisoned;
//! every content accessor returns `ExceededThreshold`.

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Raised when reading the contents of a poisoned map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Key threshold exceeded: expansion results were discarded")]
pub struct ExceededThreshold;

/// A capped set of literal values for one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet {
    values: BTreeSet<String>,
    threshold: i64,
    threshold_exceeded: bool,
}

impl ValueSet {
    /// Creates an empty set. A threshold <= 0 means unbounded.
    pub fn new(threshold: i64) -> Self {
        Self {
            values: BTreeSet::new(),
            threshold,
            threshold_exceeded: false,
        }
    }

    /// Adds a value, returning true if it was newly added.
    ///
    /// Once the set holds `threshold` values, further new values set the
    /// exceeded flag and are dropped.
    pub fn add(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.values.contains(&value) {
            return false;
        }
        if self.threshold_exceeded {
            return false;
        }
        if self.threshold > 0 && self.values.len() as i64 >= self.threshold {
            self.threshold_exceeded = true;
            return false;
        }
        self.values.insert(value)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    /// The collected values
    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    pub fn is_threshold_exceeded(&self) -> bool {
        self.threshold_exceeded
    }

    /// Marks this field as having too many (or unknown) values
    pub fn set_threshold_exceeded(&mut self) {
        self.threshold_exceeded = true;
    }
}

/// Field -> values expansion result with key/value thresholds
#[derive(Debug, Clone, Default)]
pub struct BoundedResultMap {
    index: BTreeMap<String, ValueSet>,
    patterns: BTreeSet<String>,
    key_threshold: i64,
    value_threshold: i64,
    key_threshold_exceeded: bool,
}

impl BoundedResultMap {
    /// Creates an empty map. Thresholds <= 0 mean unbounded.
    pub fn new(key_threshold: i64, value_threshold: i64) -> Self {
        Self {
            index: BTreeMap::new(),
            patterns: BTreeSet::new(),
            key_threshold,
            value_threshold,
            key_threshold_exceeded: false,
        }
    }

    /// Map with no thresholds at all
    pub fn unbounded() -> Self {
        Self::new(0, 0)
    }

    pub fn key_threshold(&self) -> i64 {
        self.key_threshold
    }

    pub fn value_threshold(&self) -> i64 {
        self.value_threshold
    }

    /// Inserts `value` under `field`.
    ///
    /// Adding a new field to a map already holding `key_threshold` fields
    /// clears the map and poisons it; the call then returns false.
    pub fn put(&mut self, field: &str, value: impl Into<String>) -> bool {
        match self.value_set_for_insert(field) {
            Some(values) => values.add(value),
            None => false,
        }
    }

    /// Marks `field` as exceeded. A field with no values yet gets the empty
    /// string as a placeholder value, so it reports one value, not zero.
    pub fn mark_field_threshold_exceeded(&mut self, field: &str) {
        if let Some(values) = self.value_set_for_insert(field) {
            if values.is_empty() {
                values.add(String::new());
            }
            values.set_threshold_exceeded();
        }
    }

    fn value_set_for_insert(&mut self, field: &str) -> Option<&mut ValueSet> {
        if self.key_threshold_exceeded {
            return None;
        }
        if !self.index.contains_key(field)
            && self.key_threshold > 0
            && self.index.len() as i64 >= self.key_threshold
        {
            self.index.clear();
            self.key_threshold_exceeded = true;
            return None;
        }

        let value_threshold = self.value_threshold;
        Some(
            self.index
                .entry(field.to_string())
                .or_insert_with(|| ValueSet::new(value_threshold)),
        )
    }

    pub fn is_key_threshold_exceeded(&self) -> bool {
        self.key_threshold_exceeded
    }

    /// Poisons the map without discarding its contents.
    ///
    /// Used when a lookup failed or timed out rather than overflowing; the
    /// contents stay unreadable either way.
    pub fn set_key_threshold_exceeded(&mut self) {
        self.key_threshold_exceeded = true;
    }

    fn check(&self) -> Result<(), ExceededThreshold> {
        if self.key_threshold_exceeded {
            Err(ExceededThreshold)
        } else {
            Ok(())
        }
    }

    pub fn get(&self, field: &str) -> Result<Option<&ValueSet>, ExceededThreshold> {
        self.check()?;
        Ok(self.index.get(field))
    }

    pub fn get_mut(&mut self, field: &str) -> Result<Option<&mut ValueSet>, ExceededThreshold> {
        self.check()?;
        Ok(self.index.get_mut(field))
    }

    pub fn contains_field(&self, field: &str) -> Result<bool, ExceededThreshold> {
        self.check()?;
        Ok(self.index.contains_key(field))
    }

    /// Number of fields
    pub fn len(&self) -> Result<usize, ExceededThreshold> {
        self.check()?;
        Ok(self.index.len())
    }

    /// A poisoned map is never empty: it overflowed, it did not find nothing.
    pub fn is_empty(&self) -> bool {
        !self.key_threshold_exceeded && self.index.is_empty()
    }

    /// Field names in sorted order
    pub fn keys(&self) -> Result<impl Iterator<Item = &str>, ExceededThreshold> {
        self.check()?;
        Ok(self.index.keys().map(String::as_str))
    }

    /// (field, values) entries in sorted field order
    pub fn iter(&self) -> Result<btree_map::Iter<'_, String, ValueSet>, ExceededThreshold> {
        self.check()?;
        Ok(self.index.iter())
    }

    /// Keeps only the given fields
    pub fn retain_fields(&mut self, fields: &BTreeSet<String>) -> Result<(), ExceededThreshold> {
        self.check()?;
        self.index.retain(|field, _| fields.contains(field));
        Ok(())
    }

    /// Drops the given fields
    pub fn remove_fields(&mut self, fields: &BTreeSet<String>) -> Result<(), ExceededThreshold> {
        self.check()?;
        self.index.retain(|field, _| !fields.contains(field));
        Ok(())
    }

    /// Patterns this map was expanded from
    pub fn patterns(&self) -> &BTreeSet<String> {
        &self.patterns
    }

    pub fn set_patterns<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
    }
}
