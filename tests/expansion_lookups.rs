//! Expansion Lookup Tests
//!
//! End-to-end lookups against the in-memory global index:
//! - Field-name discovery for unfielded terms
//! - Regex expansion through the forward and reverse index
//! - Bounded range expansion
//! - Key and value thresholds
//! - Idempotent submit and up-front rejection of disallowed patterns
//! - Per-query expansion cache

use std::collections::BTreeSet;
use std::sync::Arc;

use term_expansion::config::ExpansionConfig;
use term_expansion::lookup::{
    DeclineReason, ExceededThreshold, ExpansionCache, ExpansionPlanner, LookupError,
    LowercaseNormalizer, TaskCoordinator, TaskState,
};
use term_expansion::metadata::StaticFieldMetadata;
use term_expansion::range::LiteralRange;
use term_expansion::store::MemoryIndexStore;

// =============================================================================
// Helper Functions
// =============================================================================

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn store() -> Arc<MemoryIndexStore> {
    let store = MemoryIndexStore::with_tables("shardIndex", "shardReverseIndex");
    store.index_term("example", "NAME", "20240101_0", "csv");
    store.index_term("sample", "NAME", "20240101_1", "csv");
    store.index_term("exam", "NAME", "20240102_0", "csv");
    store.index_term("ample", "NAME", "20240103_0", "json");
    store.index_term("example", "TITLE", "20240101_0", "csv");
    store.index_term("examine", "TITLE", "20240101_0", "csv");
    for age in ["10", "15", "20", "25"] {
        store.index_term(age, "AGE", "20240101_0", "csv");
    }
    Arc::new(store)
}

fn metadata() -> StaticFieldMetadata {
    StaticFieldMetadata::new()
        .with_both("csv", "NAME")
        .with_both("json", "NAME")
        .with_both("csv", "TITLE")
        .with_indexed("csv", "AGE")
}

fn planner_with(store: &Arc<MemoryIndexStore>, config: ExpansionConfig) -> ExpansionPlanner {
    ExpansionPlanner::new(
        Arc::new(config),
        Arc::new(metadata()),
        store.clone(),
        TaskCoordinator::current(4).unwrap(),
    )
    .with_normalizer(Arc::new(LowercaseNormalizer))
}

fn planner(store: &Arc<MemoryIndexStore>) -> ExpansionPlanner {
    planner_with(store, ExpansionConfig::default())
}

fn values(map: &term_expansion::lookup::BoundedResultMap, field: &str) -> BTreeSet<String> {
    map.get(field)
        .unwrap()
        .map(|values| values.values().clone())
        .unwrap_or_default()
}

// =============================================================================
// Field-Name Discovery
// =============================================================================

/// An unfielded literal resolves to every field it is indexed under.
#[tokio::test]
async fn test_unfielded_term_finds_fields() {
    let store = store();
    let map = planner(&store)
        .field_name_task("Example", &BTreeSet::new())
        .lookup()
        .await
        .unwrap();

    assert_eq!(map.keys().unwrap().collect::<Vec<_>>(), vec!["NAME", "TITLE"]);
    assert_eq!(values(&map, "NAME"), set(&["example"]));
    assert!(map.patterns().contains("Example"));
}

/// Candidate fields restrict the fetched column families.
#[tokio::test]
async fn test_candidate_fields_restrict_discovery() {
    let store = store();
    let map = planner(&store)
        .field_name_task("example", &set(&["TITLE"]))
        .lookup()
        .await
        .unwrap();

    assert_eq!(map.keys().unwrap().collect::<Vec<_>>(), vec!["TITLE"]);
}

/// A term indexed nowhere yields an empty (not overflowed) map.
#[tokio::test]
async fn test_unknown_term_is_empty() {
    let store = store();
    let map = planner(&store)
        .field_name_task("nothing", &BTreeSet::new())
        .lookup()
        .await
        .unwrap();

    assert!(map.is_empty());
    assert!(!map.is_key_threshold_exceeded());
}

// =============================================================================
// Regex Expansion
// =============================================================================

/// Prefix patterns scan the forward index.
#[tokio::test]
async fn test_forward_regex_expansion() {
    let store = store();
    let map = planner(&store)
        .regex_term_task("NAME", "exam.*")
        .lookup()
        .await
        .unwrap();

    assert_eq!(values(&map, "NAME"), set(&["exam", "example"]));
    assert!(!map.get("NAME").unwrap().unwrap().is_threshold_exceeded());
}

/// Suffix patterns scan the reverse index and come back un-reversed.
#[tokio::test]
async fn test_reverse_regex_expansion() {
    let store = store();
    let map = planner(&store)
        .regex_term_task("NAME", ".*ample")
        .lookup()
        .await
        .unwrap();

    assert_eq!(values(&map, "NAME"), set(&["ample", "example", "sample"]));
}

/// An unfielded regex discovers fields and values together.
#[tokio::test]
async fn test_unfielded_regex_expansion() {
    let store = store();
    let map = planner(&store)
        .regex_field_name_task(".*ample")
        .lookup()
        .await
        .unwrap();

    assert_eq!(map.keys().unwrap().collect::<Vec<_>>(), vec!["NAME", "TITLE"]);
    assert_eq!(values(&map, "TITLE"), set(&["example"]));
}

/// Datatype restriction applies to streamed entries.
#[tokio::test]
async fn test_datatype_filter() {
    let store = store();
    let mut config = ExpansionConfig::default();
    config.datatype_filter = set(&["json"]);

    let map = planner_with(&store, config)
        .regex_term_task("NAME", ".*ample")
        .lookup()
        .await
        .unwrap();

    assert_eq!(values(&map, "NAME"), set(&["ample"]));
}

/// Unanchored patterns are declined unless full-table scans are enabled.
#[tokio::test]
async fn test_full_table_scan_gate() {
    let store = store();
    let err = planner(&store)
        .regex_term_task("NAME", ".*xam.*")
        .lookup()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LookupError::Declined {
            reason: DeclineReason::WildcardsBothSides,
            ..
        }
    ));

    let mut config = ExpansionConfig::default();
    config.full_table_scan_enabled = true;
    let map = planner_with(&store, config)
        .regex_term_task("NAME", ".*xam.*")
        .lookup()
        .await
        .unwrap();
    assert_eq!(values(&map, "NAME"), set(&["exam", "example"]));
}

/// `.*` and `.*?` are rejected before any session opens.
#[tokio::test]
async fn test_disallowed_patterns_rejected_up_front() {
    let store = store();
    let planner = planner(&store);

    for pattern in [".*", ".*?"] {
        let task = planner.regex_term_task("NAME", pattern);
        let err = task.submit().unwrap_err();
        assert!(err.is_decline());
        assert!(matches!(
            err,
            LookupError::Declined {
                reason: DeclineReason::DisallowedPattern,
                ..
            }
        ));
        assert_eq!(task.state(), TaskState::Failed);
    }
    assert_eq!(store.opened_sessions(), 0);
}

// =============================================================================
// Bounded Ranges
// =============================================================================

/// Inclusive and exclusive upper bounds.
#[tokio::test]
async fn test_bounded_range_expansion() {
    let store = store();
    let planner = planner(&store);

    let inclusive = planner
        .bounded_range_task(LiteralRange::new("AGE", "10", true, "20", true))
        .unwrap()
        .lookup()
        .await
        .unwrap();
    assert_eq!(values(&inclusive, "AGE"), set(&["10", "15", "20"]));

    let exclusive = planner
        .bounded_range_task(LiteralRange::new("AGE", "10", false, "20", false))
        .unwrap()
        .lookup()
        .await
        .unwrap();
    assert_eq!(values(&exclusive, "AGE"), set(&["15"]));
}

/// Inverted bounds fail at submit.
#[tokio::test]
async fn test_inverted_range_rejected() {
    let store = store();
    let task = planner(&store)
        .bounded_range_task(LiteralRange::new("AGE", "30", true, "10", true))
        .unwrap();
    let err = task.submit().unwrap_err();
    assert_eq!(err.code(), "EXPAND_INVALID_RANGE");
}

// =============================================================================
// Thresholds
// =============================================================================

/// Exceeding the value threshold caps the field and flags it.
#[tokio::test]
async fn test_value_threshold_caps_field() {
    let store = store();
    let config = ExpansionConfig::default().with_thresholds(500, 2);
    let map = planner_with(&store, config)
        .regex_term_task("NAME", ".*ample")
        .lookup()
        .await
        .unwrap();

    let values = map.get("NAME").unwrap().unwrap();
    assert_eq!(values.len(), 2);
    assert!(values.is_threshold_exceeded());
    assert!(!map.is_key_threshold_exceeded());
}

/// Exceeding the key threshold poisons the map.
#[tokio::test]
async fn test_key_threshold_poisons_map() {
    let store = store();
    let config = ExpansionConfig::default().with_thresholds(1, 0);
    let map = planner_with(&store, config)
        .regex_field_name_task(".*ample")
        .lookup()
        .await
        .unwrap();

    assert!(map.is_key_threshold_exceeded());
    assert_eq!(map.get("NAME").err(), Some(ExceededThreshold));
    assert!(map.keys().is_err());
    assert!(!map.is_empty());
}

// =============================================================================
// Submission
// =============================================================================

/// Submitting twice schedules one job.
#[tokio::test]
async fn test_submit_is_idempotent() {
    let store = store();
    let task = planner(&store).regex_term_task("NAME", "exam.*");

    task.submit().unwrap();
    task.submit().unwrap();
    assert_eq!(store.opened_sessions(), 1);

    let map = task.lookup().await.unwrap();
    assert_eq!(values(&map, "NAME"), set(&["exam", "example"]));
    assert_eq!(store.opened_sessions(), 1);
    assert_eq!(store.closed_sessions(), 1);
}

/// Blocking lookups work from outside the runtime.
#[test]
fn test_lookup_blocking() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = store();
    let planner = ExpansionPlanner::new(
        Arc::new(ExpansionConfig::default()),
        Arc::new(metadata()),
        store.clone(),
        TaskCoordinator::new(runtime.handle().clone(), 2),
    );

    let map = planner
        .regex_term_task("NAME", "samp.*")
        .lookup_blocking()
        .unwrap();
    assert_eq!(values(&map, "NAME"), set(&["sample"]));
}

// =============================================================================
// Expansion Cache
// =============================================================================

/// Completed lookups are cached once; overflowed ones are not.
#[tokio::test]
async fn test_cache_records_completed_expansions() {
    let store = store();
    let planner = planner(&store);
    let cache = ExpansionCache::new();

    for _ in 0..2 {
        let map = planner
            .regex_term_task("NAME", "exam.*")
            .lookup()
            .await
            .unwrap();
        cache.add_expansion(&map);
    }
    assert!(cache.contains_expansions_for("NAME", "example"));
    assert_eq!(cache.expansions_for("NAME").len(), 1);

    let poisoned = planner_with(&store, ExpansionConfig::default().with_thresholds(1, 0))
        .regex_field_name_task(".*ample")
        .lookup()
        .await
        .unwrap();
    cache.add_expansion(&poisoned);
    assert!(!cache.contains_expansions_for("TITLE", "example"));
}
