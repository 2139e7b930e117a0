//! Index expansion lookups
//!
//! Each lookup is an `ExpansionTask`: a strategy (what to scan, how to read
//! entries) run on the `TaskCoordinator`'s bounded pool, filling one
//! `BoundedResultMap` under the configured thresholds and scan budget.
//!
//! # Invariants
//!
//! - A result map has exactly one writer (the task's job) and is only read
//!   after the job hands it back
//! - Poisoning a map is one-way; a poisoned map's contents are unreadable
//! - Timeouts and overflow are reported on the map, never as errors
//! - Every scan session a task opens is closed exactly once

mod cache;
mod coordinator;
mod errors;
mod planner;
mod result_map;
mod strategy;
mod task;

pub use cache::ExpansionCache;
pub use coordinator::{JobOutcome, ScheduledJob, TaskCoordinator};
pub use errors::{DeclineReason, LookupError, LookupResult, Severity};
pub use planner::{ExpansionPlanner, LowercaseNormalizer, Normalizer};
pub use result_map::{BoundedResultMap, ExceededThreshold, ValueSet};
pub use strategy::{
    BoundedRangeStrategy, ExpansionStrategy, FieldNameStrategy, RegexTermStrategy, ScanBatch,
};
pub use task::{ExpansionTask, TaskState};
