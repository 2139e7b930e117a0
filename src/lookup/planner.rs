//! Builds expansion tasks for the predicate layer
//!
//! Resolves the fields a lookup may touch from index metadata, expands a
//! term into its normalized variants, and wires the chosen strategy into an
//! `ExpansionTask` sharing the query's config, store and coordinator.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::ExpansionConfig;
use crate::metadata::{indexed_expansion_fields, FieldMetadata};
use crate::range::LiteralRange;
use crate::store::ScannerFactory;

use super::coordinator::TaskCoordinator;
use super::errors::{LookupError, LookupResult};
use super::strategy::{
    BoundedRangeStrategy, ExpansionStrategy, FieldNameStrategy, RegexTermStrategy,
};
use super::task::ExpansionTask;

/// Maps query terms onto the form they are indexed under
pub trait Normalizer: Send + Sync + fmt::Debug {
    /// Normalized form of a literal term, `None` if it does not apply
    fn normalize(&self, term: &str) -> Option<String>;

    /// Normalized form of a regex, `None` if it does not apply
    fn normalize_regex(&self, pattern: &str) -> Option<String>;
}

/// Lowercases terms and patterns
#[derive(Debug, Clone, Copy, Default)]
pub struct LowercaseNormalizer;

impl Normalizer for LowercaseNormalizer {
    fn normalize(&self, term: &str) -> Option<String> {
        Some(term.to_lowercase())
    }

    fn normalize_regex(&self, pattern: &str) -> Option<String> {
        // escapes like \W or \S change meaning when lowercased
        if pattern.contains('\\') {
            return None;
        }
        Some(pattern.to_lowercase())
    }
}

/// Factory for the expansion tasks of one query
#[derive(Clone)]
pub struct ExpansionPlanner {
    config: Arc<ExpansionConfig>,
    metadata: Arc<dyn FieldMetadata>,
    scanner: Arc<dyn ScannerFactory>,
    coordinator: TaskCoordinator,
    normalizers: Vec<Arc<dyn Normalizer>>,
}

impl fmt::Debug for ExpansionPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpansionPlanner")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("normalizers", &self.normalizers)
            .finish()
    }
}

impl ExpansionPlanner {
    pub fn new(
        config: Arc<ExpansionConfig>,
        metadata: Arc<dyn FieldMetadata>,
        scanner: Arc<dyn ScannerFactory>,
        coordinator: TaskCoordinator,
    ) -> Self {
        Self {
            config,
            metadata,
            scanner,
            coordinator,
            normalizers: Vec::new(),
        }
    }

    /// Planner on the current runtime whose coordinator admits
    /// `config.max_concurrent_lookups` scans at a time
    pub fn from_config(
        config: Arc<ExpansionConfig>,
        metadata: Arc<dyn FieldMetadata>,
        scanner: Arc<dyn ScannerFactory>,
    ) -> LookupResult<Self> {
        let coordinator = TaskCoordinator::current_from_config(&config)?;
        Ok(Self::new(config, metadata, scanner, coordinator))
    }

    pub fn coordinator(&self) -> &TaskCoordinator {
        &self.coordinator
    }

    /// Adds a normalizer applied to every term and pattern
    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizers.push(normalizer);
        self
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    /// The term plus every normalized variant of it
    pub fn normalized_terms(&self, term: &str) -> BTreeSet<String> {
        std::iter::once(term.to_string())
            .chain(self.normalizers.iter().filter_map(|n| n.normalize(term)))
            .collect()
    }

    /// The pattern plus every normalized variant of it
    pub fn normalized_patterns(&self, pattern: &str) -> BTreeSet<String> {
        std::iter::once(pattern.to_string())
            .chain(
                self.normalizers
                    .iter()
                    .filter_map(|n| n.normalize_regex(pattern)),
            )
            .collect()
    }

    /// Fields indexed in the given direction, restricted to `requested`
    /// unless it is empty
    pub fn expansion_fields(&self, requested: &BTreeSet<String>, reverse_index: bool) -> BTreeSet<String> {
        indexed_expansion_fields(
            self.metadata.as_ref(),
            requested,
            reverse_index,
            &self.config.datatype_filter,
        )
    }

    /// Wraps any strategy in a task
    pub fn task(&self, strategy: Arc<dyn ExpansionStrategy>) -> ExpansionTask {
        ExpansionTask::new(
            strategy,
            Arc::clone(&self.config),
            Arc::clone(&self.metadata),
            Arc::clone(&self.scanner),
            self.coordinator.clone(),
        )
    }

    /// Finds the fields an unfielded literal term occurs in.
    ///
    /// `candidate_fields` narrows the search; empty means every indexed field.
    pub fn field_name_task(&self, term: &str, candidate_fields: &BTreeSet<String>) -> ExpansionTask {
        let fields = self.expansion_fields(candidate_fields, false);
        if fields.is_empty() {
            tracing::debug!(term, "no indexed expansion fields, lookup will match nothing");
        }
        self.task(Arc::new(FieldNameStrategy::new(
            self.normalized_terms(term),
            fields,
        )))
    }

    /// Finds the values of `field` matching `pattern`
    pub fn regex_term_task(&self, field: &str, pattern: &str) -> ExpansionTask {
        self.task(Arc::new(RegexTermStrategy::for_field(
            field,
            self.normalized_patterns(pattern),
        )))
    }

    /// Finds the fields (and values) matching an unfielded pattern
    pub fn regex_field_name_task(&self, pattern: &str) -> ExpansionTask {
        let none = BTreeSet::new();
        let fields = self.expansion_fields(&none, false);
        let reverse_fields = self.expansion_fields(&none, true);
        self.task(Arc::new(RegexTermStrategy::unfielded(
            self.normalized_patterns(pattern),
            fields,
            reverse_fields,
        )))
    }

    /// Finds the values of a field within a bounded range
    pub fn bounded_range_task(&self, range: LiteralRange) -> LookupResult<ExpansionTask> {
        if !self
            .metadata
            .is_indexed(range.field(), &self.config.datatype_filter)
        {
            return Err(LookupError::NotIndexed(range.field().to_string()));
        }
        Ok(self.task(Arc::new(BoundedRangeStrategy::new(range))))
    }
}
