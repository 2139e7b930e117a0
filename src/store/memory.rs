//! In-memory global index
//!
//! A `ScannerFactory` over `BTreeMap` tables. Applies ranges, the column
//! family restriction and the filter stack the way the server-side
//! iterators would, including the fairness cut-off and its sentinel.
//! Counts opened and closed sessions so callers can check cleanup.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use regex::Regex;

use super::errors::{StoreError, StoreResult};
use super::key::{IndexEntry, IndexKey};
use super::request::{FilterKind, ScanRequest};
use super::session::{ScanSession, ScannerFactory};

type Table = BTreeMap<IndexKey, Vec<u8>>;

/// In-memory forward/reverse global index
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    tables: RwLock<HashMap<String, Table>>,
    forward_table: String,
    reverse_table: String,
    entry_delay: Option<Duration>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MemoryIndexStore {
    /// Creates a store with an empty forward and reverse table
    pub fn with_tables(forward_table: &str, reverse_table: &str) -> Self {
        let mut tables = HashMap::new();
        tables.insert(forward_table.to_string(), Table::new());
        tables.insert(reverse_table.to_string(), Table::new());

        Self {
            tables: RwLock::new(tables),
            forward_table: forward_table.to_string(),
            reverse_table: reverse_table.to_string(),
            ..Default::default()
        }
    }

    /// Slows every examined entry down, to exercise scan budgets
    pub fn with_entry_delay(mut self, delay: Duration) -> Self {
        self.entry_delay = Some(delay);
        self
    }

    /// Inserts a raw entry into a table, creating the table if needed
    pub fn insert(&self, table: &str, key: IndexKey, value: impl Into<Vec<u8>>) {
        if let Ok(mut tables) = self.tables.write() {
            tables
                .entry(table.to_string())
                .or_default()
                .insert(key, value.into());
        }
    }

    /// Indexes `term` for `field` in both the forward and reverse table
    pub fn index_term(&self, term: &str, field: &str, shard: &str, datatype: &str) {
        let qualifier = IndexKey::qualifier(shard, datatype);
        let reversed: String = term.chars().rev().collect();

        self.insert(
            &self.forward_table,
            IndexKey::new(term, field, qualifier.clone()),
            Vec::new(),
        );
        self.insert(
            &self.reverse_table,
            IndexKey::new(reversed, field, qualifier),
            Vec::new(),
        );
    }

    pub fn opened_sessions(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ScannerFactory for MemoryIndexStore {
    fn open_session(&self, table: &str, request: ScanRequest) -> StoreResult<Box<dyn ScanSession>> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::SessionFailed("table lock poisoned".into()))?;
        let data = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        // Snapshot the entries selected by range and column family; the
        // filter stack runs lazily while streaming.
        let mut selected: Vec<IndexEntry> = Vec::new();
        for range in &request.ranges {
            for (key, value) in data.iter() {
                if range.contains(key) && request.accepts_family(&key.column_family) {
                    selected.push(IndexEntry::new(key.clone(), value.clone()));
                }
            }
        }
        selected.sort_by(|a, b| a.key.cmp(&b.key));
        selected.dedup_by(|a, b| a.key == b.key);

        let filters = CompiledFilters::compile(&request)?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(table, candidates = selected.len(), "opened memory scan session");

        Ok(Box::new(MemoryScanSession {
            entries: selected.into_iter(),
            filters,
            started: Instant::now(),
            entry_delay: self.entry_delay,
            last_unique: None,
            finished: false,
            closed: Arc::clone(&self.closed),
        }))
    }
}

#[derive(Debug, Default)]
struct CompiledFilters {
    max_session_time: Option<Duration>,
    emit_sentinel: bool,
    date_range: Option<(String, String)>,
    datatypes: Option<BTreeSet<String>>,
    term_match: Option<TermMatcher>,
}

#[derive(Debug)]
struct TermMatcher {
    literals: BTreeSet<String>,
    patterns: Vec<Regex>,
    reverse_index: bool,
    unique_terms_in_field: bool,
}

impl TermMatcher {
    fn matches(&self, row: &str) -> bool {
        let term: String = if self.reverse_index {
            row.chars().rev().collect()
        } else {
            row.to_string()
        };
        self.literals.contains(&term) || self.patterns.iter().any(|p| p.is_match(&term))
    }
}

impl CompiledFilters {
    fn compile(request: &ScanRequest) -> StoreResult<Self> {
        let mut compiled = CompiledFilters::default();
        for filter in &request.filters {
            match &filter.kind {
                FilterKind::Fairness { max_session_time } => {
                    compiled.max_session_time = Some(*max_session_time);
                }
                FilterKind::TimeoutSentinel => compiled.emit_sentinel = true,
                FilterKind::DateRange { begin, end } => {
                    compiled.date_range = Some((begin.clone(), end.clone()));
                }
                FilterKind::Datatype { datatypes } => {
                    compiled.datatypes = Some(datatypes.clone());
                }
                FilterKind::TermMatch {
                    literals,
                    patterns,
                    reverse_index,
                    unique_terms_in_field,
                } => {
                    let patterns = patterns
                        .iter()
                        .map(|p| {
                            Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                                StoreError::InvalidRequest(format!("bad pattern {}: {}", p, e))
                            })
                        })
                        .collect::<StoreResult<Vec<_>>>()?;
                    compiled.term_match = Some(TermMatcher {
                        literals: literals.clone(),
                        patterns,
                        reverse_index: *reverse_index,
                        unique_terms_in_field: *unique_terms_in_field,
                    });
                }
            }
        }
        Ok(compiled)
    }
}

struct MemoryScanSession {
    entries: std::vec::IntoIter<IndexEntry>,
    filters: CompiledFilters,
    started: Instant,
    entry_delay: Option<Duration>,
    last_unique: Option<(String, String)>,
    finished: bool,
    closed: Arc<AtomicUsize>,
}

impl MemoryScanSession {
    fn accepts(&mut self, key: &IndexKey) -> bool {
        if let Some((begin, end)) = &self.filters.date_range {
            let shard = key.shard();
            if shard < begin.as_str() || shard > end.as_str() {
                return false;
            }
        }
        if let Some(datatypes) = &self.filters.datatypes {
            match key.datatype() {
                Some(dt) if datatypes.contains(dt) => {}
                _ => return false,
            }
        }
        if let Some(matcher) = &self.filters.term_match {
            if !matcher.matches(&key.row) {
                return false;
            }
            if matcher.unique_terms_in_field {
                let current = (key.row.clone(), key.column_family.clone());
                if self.last_unique.as_ref() == Some(&current) {
                    return false;
                }
                self.last_unique = Some(current);
            }
        }
        true
    }
}

impl ScanSession for MemoryScanSession {
    fn next_entry(&mut self) -> Option<StoreResult<IndexEntry>> {
        if self.finished {
            return None;
        }
        loop {
            let entry = match self.entries.next() {
                Some(entry) => entry,
                None => {
                    self.finished = true;
                    return None;
                }
            };

            if let Some(delay) = self.entry_delay {
                std::thread::sleep(delay);
            }

            if let Some(max) = self.filters.max_session_time {
                if self.started.elapsed() > max {
                    self.finished = true;
                    if self.filters.emit_sentinel {
                        return Some(Ok(IndexEntry::timeout_sentinel(entry.key)));
                    }
                    return None;
                }
            }

            if self.accepts(&entry.key) {
                return Some(Ok(entry));
            }
        }
    }

    fn close(&mut self) {
        self.finished = true;
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FilterDescriptor, ScanRange};

    fn store() -> MemoryIndexStore {
        let store = MemoryIndexStore::with_tables("fwd", "rev");
        store.index_term("alpha", "NAME", "20240101_0", "csv");
        store.index_term("alpine", "NAME", "20240102_0", "json");
        store.index_term("alpha", "CITY", "20240301_0", "csv");
        store.index_term("beta", "NAME", "20240101_0", "csv");
        store
    }

    fn drain(session: &mut Box<dyn ScanSession>) -> Vec<IndexEntry> {
        let mut out = Vec::new();
        while let Some(entry) = session.next_entry() {
            out.push(entry.unwrap());
        }
        out
    }

    #[test]
    fn test_missing_table() {
        let store = store();
        let err = store.open_session("nope", ScanRequest::default()).err();
        assert_eq!(err, Some(StoreError::TableNotFound("nope".into())));
    }

    #[test]
    fn test_range_and_family_restriction() {
        let store = store();
        let mut request = ScanRequest::new(vec![ScanRange::exact_row("alpha")]);
        request.fetch_column_family("NAME");

        let mut session = store.open_session("fwd", request).unwrap();
        let entries = drain(&mut session);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.column_family, "NAME");
    }

    #[test]
    fn test_date_and_datatype_filters() {
        let store = store();
        let request = ScanRequest::new(vec![ScanRange::full()]).with_filters([
            FilterDescriptor::new(
                121,
                "dateFilter",
                FilterKind::DateRange {
                    begin: "20240101".into(),
                    end: format!("20240131{}", crate::store::MAX_UNICODE_CHAR),
                },
            ),
            FilterDescriptor::new(
                122,
                "dataTypeFilter",
                FilterKind::Datatype {
                    datatypes: ["csv".to_string()].into_iter().collect(),
                },
            ),
        ]);

        let mut session = store.open_session("fwd", request).unwrap();
        let rows: Vec<_> = drain(&mut session).into_iter().map(|e| e.key.row).collect();
        assert_eq!(rows, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_reverse_term_match() {
        let store = store();
        let request = ScanRequest::new(vec![ScanRange::full()]).with_filters([FilterDescriptor::new(
            124,
            "termMatcher",
            FilterKind::TermMatch {
                literals: BTreeSet::new(),
                patterns: [".*ine".to_string()].into_iter().collect(),
                reverse_index: true,
                unique_terms_in_field: true,
            },
        )]);

        let mut session = store.open_session("rev", request).unwrap();
        let entries = drain(&mut session);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.row, "enipla");
    }

    #[test]
    fn test_fairness_emits_sentinel() {
        let store = store().with_entry_delay(Duration::from_millis(5));
        let request = ScanRequest::new(vec![ScanRange::full()]).with_filters([
            FilterDescriptor::new(
                1,
                "fairness",
                FilterKind::Fairness {
                    max_session_time: Duration::from_millis(1),
                },
            ),
            FilterDescriptor::new(200, "timeoutSentinel", FilterKind::TimeoutSentinel),
        ]);

        let mut session = store.open_session("fwd", request).unwrap();
        let first = session.next_entry().unwrap().unwrap();
        assert!(first.is_timeout_sentinel());
        assert!(session.next_entry().is_none());
    }

    #[test]
    fn test_session_counters() {
        let store = store();
        let mut session = store.open_session("fwd", ScanRequest::default()).unwrap();
        assert_eq!(store.opened_sessions(), 1);
        session.close();
        assert_eq!(store.closed_sessions(), 1);
    }
}
