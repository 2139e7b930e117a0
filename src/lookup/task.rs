//! Expansion tasks
//!
//! An `ExpansionTask` plans its scans, opens the sessions, and streams the
//! entries into a `BoundedResultMap` on the coordinator's worker pool.
//!
//! # Lifecycle
//!
//! `NotSubmitted -> Submitted -> Running -> Completed | TimedOut | Failed`
//!
//! `submit()` is idempotent. `lookup()` submits if needed, then waits under
//! the configured budget. Timeouts and overflow are reported on the map,
//! never as errors:
//!
//! - fielded lookups mark every requested field as exceeded
//! - unfielded lookups poison the whole map

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::config::ExpansionConfig;
use crate::metadata::FieldMetadata;
use crate::range::RangeSelector;
use crate::store::{ScannerFactory, SessionGuard};

use super::coordinator::{JobOutcome, ScheduledJob, TaskCoordinator};
use super::errors::{LookupError, LookupResult};
use super::result_map::BoundedResultMap;
use super::strategy::ExpansionStrategy;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotSubmitted,
    Submitted,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::TimedOut | TaskState::Failed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::NotSubmitted => "not_submitted",
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::TimedOut => "timed_out",
            TaskState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single index expansion: one strategy, one result map
pub struct ExpansionTask {
    id: Uuid,
    strategy: Arc<dyn ExpansionStrategy>,
    config: Arc<ExpansionConfig>,
    metadata: Arc<dyn FieldMetadata>,
    scanner: Arc<dyn ScannerFactory>,
    coordinator: TaskCoordinator,
    state: Arc<Mutex<TaskState>>,
    job: Mutex<Option<ScheduledJob>>,
}

impl ExpansionTask {
    pub fn new(
        strategy: Arc<dyn ExpansionStrategy>,
        config: Arc<ExpansionConfig>,
        metadata: Arc<dyn FieldMetadata>,
        scanner: Arc<dyn ScannerFactory>,
        coordinator: TaskCoordinator,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy,
            config,
            metadata,
            scanner,
            coordinator,
            state: Arc::new(Mutex::new(TaskState::NotSubmitted)),
            job: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TaskState {
        *lock(&self.state)
    }

    pub fn strategy(&self) -> &dyn ExpansionStrategy {
        self.strategy.as_ref()
    }

    fn set_state(&self, state: TaskState) {
        *lock(&self.state) = state;
    }

    /// Plans the scans, opens their sessions and schedules the streaming job.
    ///
    /// Calling it again after a successful submit does nothing. Planning and
    /// session-open failures are returned here and leave the task `Failed`.
    pub fn submit(&self) -> LookupResult<()> {
        let mut job = lock(&self.job);
        if job.is_some() || self.state() != TaskState::NotSubmitted {
            return Ok(());
        }

        let sessions = match self.open_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::debug!(task_id = %self.id, kind = self.strategy.kind(), error = %e, "expansion submit failed");
                self.set_state(TaskState::Failed);
                return Err(e);
            }
        };

        let mut map = BoundedResultMap::new(
            self.config.max_unfielded_expansion_threshold,
            self.config.max_value_expansion_threshold,
        );
        map.set_patterns(self.strategy.patterns());

        let scan = StreamingScan {
            task_id: self.id,
            strategy: Arc::clone(&self.strategy),
            datatypes: self.config.datatype_filter.clone(),
            sessions,
            state: Arc::clone(&self.state),
        };

        self.set_state(TaskState::Submitted);
        *job = Some(self.coordinator.schedule(self.id, move |cancel| scan.run(map, cancel)));

        tracing::debug!(
            task_id = %self.id,
            kind = self.strategy.kind(),
            patterns = ?self.strategy.patterns(),
            "submitted expansion task"
        );
        Ok(())
    }

    fn open_sessions(&self) -> LookupResult<Vec<(bool, SessionGuard)>> {
        let selector = RangeSelector::new(&self.config, self.metadata.as_ref());
        let batches = self.strategy.plan(&self.config, &selector)?;

        let mut sessions = Vec::with_capacity(batches.len());
        for batch in batches {
            tracing::trace!(
                task_id = %self.id,
                table = %batch.table,
                ranges = batch.request.ranges.len(),
                reverse = batch.reverse_index,
                "opening scan session"
            );
            // sessions already opened are closed by their guards on error
            let session = self.scanner.open_session(&batch.table, batch.request)?;
            sessions.push((batch.reverse_index, SessionGuard::new(batch.table, session)));
        }
        Ok(sessions)
    }

    fn take_job(&self) -> Option<ScheduledJob> {
        lock(&self.job).take()
    }

    /// Waits for the expansion, submitting it first if needed.
    ///
    /// A lookup that runs past `max_index_scan_time` is cancelled and its
    /// map marked as overflowed.
    pub async fn lookup(self) -> LookupResult<BoundedResultMap> {
        self.submit()?;
        let job = self.take_job().ok_or_else(|| {
            LookupError::TaskFailed(format!("task {} has no scheduled job", self.id))
        })?;

        let outcome = self
            .coordinator
            .await_job(job, self.config.max_index_scan_time())
            .await;

        match outcome {
            Ok(JobOutcome::Completed(map)) => {
                self.set_state(TaskState::Completed);
                tracing::debug!(
                    task_id = %self.id,
                    kind = self.strategy.kind(),
                    overflowed = map.is_key_threshold_exceeded(),
                    "expansion completed"
                );
                Ok(map)
            }
            Ok(JobOutcome::TimedOut(mut map)) => {
                mark_overflow(&mut map, self.strategy.as_ref());
                self.set_state(TaskState::TimedOut);
                tracing::info!(
                    task_id = %self.id,
                    kind = self.strategy.kind(),
                    patterns = ?map.patterns(),
                    "expansion timed out"
                );
                Ok(map)
            }
            Err(e) => {
                self.set_state(TaskState::Failed);
                tracing::warn!(task_id = %self.id, kind = self.strategy.kind(), error = %e, "expansion failed");
                Err(e)
            }
        }
    }

    /// `lookup()` for callers outside the async runtime
    pub fn lookup_blocking(self) -> LookupResult<BoundedResultMap> {
        let handle = self.coordinator.handle().clone();
        handle.block_on(self.lookup())
    }
}

impl fmt::Debug for ExpansionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpansionTask")
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .field("state", &self.state())
            .finish()
    }
}

/// Records an incomplete lookup on the map
pub(crate) fn mark_overflow(map: &mut BoundedResultMap, strategy: &dyn ExpansionStrategy) {
    if strategy.is_fielded() {
        for field in strategy.target_fields() {
            map.mark_field_threshold_exceeded(field);
        }
    } else {
        map.set_key_threshold_exceeded();
    }
}

/// Why streaming one session ended
enum ScanEnd {
    Exhausted,
    /// A threshold made further entries pointless
    Stopped,
    Cancelled,
    /// The store cut the scan short or failed mid-stream
    Overrun,
}

/// The background half of a task, moved onto the worker pool
struct StreamingScan {
    task_id: Uuid,
    strategy: Arc<dyn ExpansionStrategy>,
    datatypes: BTreeSet<String>,
    sessions: Vec<(bool, SessionGuard)>,
    state: Arc<Mutex<TaskState>>,
}

impl StreamingScan {
    fn run(self, mut map: BoundedResultMap, cancel: &AtomicBool) -> LookupResult<BoundedResultMap> {
        *lock(&self.state) = TaskState::Running;
        let mut entries = 0usize;

        for (reverse_index, mut session) in self.sessions {
            let end = stream(
                &mut session,
                reverse_index,
                self.strategy.as_ref(),
                &self.datatypes,
                &mut map,
                cancel,
                &mut entries,
            )?;
            session.close();

            match end {
                ScanEnd::Exhausted => continue,
                ScanEnd::Stopped | ScanEnd::Cancelled => break,
                ScanEnd::Overrun => {
                    mark_overflow(&mut map, self.strategy.as_ref());
                    break;
                }
            }
        }

        tracing::trace!(task_id = %self.task_id, entries, "expansion job finished streaming");
        Ok(map)
    }
}

fn stream(
    session: &mut SessionGuard,
    reverse_index: bool,
    strategy: &dyn ExpansionStrategy,
    datatypes: &BTreeSet<String>,
    map: &mut BoundedResultMap,
    cancel: &AtomicBool,
    entries: &mut usize,
) -> LookupResult<ScanEnd> {
    // with one field in play, a full value set means nothing more can change
    let scan_fields = strategy.scan_fields(reverse_index);
    let single_field = match scan_fields.len() {
        1 => scan_fields.iter().next(),
        _ => None,
    };

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok(ScanEnd::Cancelled);
        }

        let entry = match session.next_entry() {
            None => return Ok(ScanEnd::Exhausted),
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                tracing::warn!(table = session.table(), error = %e, "scan failed mid-stream");
                return Ok(ScanEnd::Overrun);
            }
        };

        if entry.is_timeout_sentinel() {
            tracing::debug!(table = session.table(), key = %entry.key, "scan exceeded its session time");
            return Ok(ScanEnd::Overrun);
        }

        match entry.key.datatype() {
            Some(datatype) if datatypes.is_empty() || datatypes.contains(datatype) => {}
            _ => continue,
        }

        let (field, value) = strategy.extract(&entry, reverse_index)?;
        map.put(&field, value);
        *entries += 1;

        if map.is_key_threshold_exceeded() {
            tracing::debug!(field = %field, "key threshold exceeded, stopping scan");
            return Ok(ScanEnd::Stopped);
        }

        if let Some(single) = single_field {
            let exceeded = map
                .get(single)
                .ok()
                .flatten()
                .map(|values| values.is_threshold_exceeded())
                .unwrap_or(false);
            if exceeded {
                tracing::debug!(field = %single, "value threshold exceeded, stopping scan");
                return Ok(ScanEnd::Stopped);
            }
        }
    }
}
