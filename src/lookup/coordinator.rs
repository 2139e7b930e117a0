//! Bounded execution and timed waiting for expansion jobs
//!
//! Jobs run on the runtime's blocking pool, at most `max_concurrent_lookups`
//! at a time. Each job reports when it actually starts; the scan budget is
//! measured from that instant, not from submission, so time spent queued for
//! a permit does not count against it.
//!
//! # Timeout protocol
//!
//! 1. wait for the started signal (a dropped signal means the executor shut
//!    down before the job ran)
//! 2. wait for the job for whatever is left of the budget
//! 3. on expiry, raise the cancel flag and wait for the job to hand its map
//!    back; the job checks the flag between entries
//!
//! The map travels into the job and back out through its join handle, so it
//! is never shared while the job writes to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

use crate::config::ExpansionConfig;

use super::errors::{LookupError, LookupResult};
use super::result_map::BoundedResultMap;

/// A job handed to the coordinator, not yet awaited
#[derive(Debug)]
pub struct ScheduledJob {
    task_id: Uuid,
    started: oneshot::Receiver<Instant>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<LookupResult<BoundedResultMap>>,
}

impl ScheduledJob {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Asks the job to stop at its next entry
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    /// Ran to completion (or stopped on a threshold) within budget
    Completed(BoundedResultMap),
    /// Cancelled at the budget; the map holds whatever was collected
    TimedOut(BoundedResultMap),
}

/// Bounded worker pool for expansion jobs
#[derive(Debug, Clone)]
pub struct TaskCoordinator {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskCoordinator {
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Coordinator on the runtime the caller is running in
    pub fn current(max_concurrent: usize) -> LookupResult<Self> {
        let handle = Handle::try_current().map_err(|e| {
            LookupError::TaskFailed(format!("no tokio runtime available: {}", e))
        })?;
        Ok(Self::new(handle, max_concurrent))
    }

    /// Coordinator bounded by `config.max_concurrent_lookups`
    pub fn from_config(handle: Handle, config: &ExpansionConfig) -> Self {
        Self::new(handle, config.max_concurrent_lookups)
    }

    /// Coordinator on the current runtime, bounded by the config
    pub fn current_from_config(config: &ExpansionConfig) -> LookupResult<Self> {
        Self::current(config.max_concurrent_lookups)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits not currently held by a running job
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stops accepting work. Jobs still waiting for a permit never start.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    /// Schedules `job` on the blocking pool once a permit is free.
    ///
    /// The job receives the cancel flag and must return its map when the
    /// flag is raised.
    pub fn schedule<F>(&self, task_id: Uuid, job: F) -> ScheduledJob
    where
        F: FnOnce(&AtomicBool) -> LookupResult<BoundedResultMap> + Send + 'static,
    {
        let (started_tx, started_rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let job_cancel = Arc::clone(&cancel);
        let permits = Arc::clone(&self.permits);

        let handle = self.handle.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| LookupError::ExecutorShutdown)?;

            let blocking = tokio::task::spawn_blocking(move || {
                let _ = started_tx.send(Instant::now());
                job(&job_cancel)
            });

            blocking.await.map_err(job_failure)?
        });

        tracing::trace!(%task_id, "scheduled expansion job");

        ScheduledJob {
            task_id,
            started: started_rx,
            cancel,
            handle,
        }
    }

    /// Waits for `job` under `budget` (`None` waits indefinitely)
    pub async fn await_job(
        &self,
        job: ScheduledJob,
        budget: Option<Duration>,
    ) -> LookupResult<JobOutcome> {
        let ScheduledJob {
            task_id,
            started,
            cancel,
            mut handle,
        } = job;

        let started_at = match started.await {
            Ok(instant) => instant,
            Err(_) => {
                tracing::warn!(%task_id, "expansion job dropped before it started");
                return Err(LookupError::ExecutorShutdown);
            }
        };

        let budget = match budget {
            Some(budget) => budget,
            None => {
                let map = joined(handle.await)?;
                return Ok(JobOutcome::Completed(map));
            }
        };

        let remaining = budget.saturating_sub(started_at.elapsed());
        match tokio::time::timeout(remaining, &mut handle).await {
            Ok(result) => Ok(JobOutcome::Completed(joined(result)?)),
            Err(_) => {
                tracing::debug!(%task_id, budget_ms = budget.as_millis() as u64, "expansion budget elapsed, cancelling");
                cancel.store(true, Ordering::SeqCst);
                let map = joined(handle.await)?;
                tracing::debug!(%task_id, elapsed_ms = started_at.elapsed().as_millis() as u64, "expansion job stopped");
                Ok(JobOutcome::TimedOut(map))
            }
        }
    }
}

fn job_failure(e: JoinError) -> LookupError {
    if e.is_cancelled() {
        LookupError::Interrupted(e.to_string())
    } else {
        LookupError::TaskFailed(e.to_string())
    }
}

fn joined(
    result: Result<LookupResult<BoundedResultMap>, JoinError>,
) -> LookupResult<BoundedResultMap> {
    result.map_err(job_failure)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_job(count: usize) -> impl FnOnce(&AtomicBool) -> LookupResult<BoundedResultMap> {
        move |_cancel| {
            let mut map = BoundedResultMap::unbounded();
            for i in 0..count {
                map.put("F", i.to_string());
            }
            Ok(map)
        }
    }

    #[tokio::test]
    async fn test_completed_without_budget() {
        let coordinator = TaskCoordinator::current(2).unwrap();
        let job = coordinator.schedule(Uuid::new_v4(), counting_job(3));
        match coordinator.await_job(job, None).await.unwrap() {
            JobOutcome::Completed(map) => assert_eq!(map.get("F").unwrap().unwrap().len(), 3),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permits_follow_config() {
        let config = ExpansionConfig::from_json(r#"{"max_concurrent_lookups": 1}"#).unwrap();
        let coordinator = TaskCoordinator::current_from_config(&config).unwrap();
        assert_eq!(coordinator.max_concurrent(), 1);
        assert_eq!(coordinator.available_permits(), 1);

        let coordinator = TaskCoordinator::from_config(Handle::current(), &ExpansionConfig::default());
        assert_eq!(coordinator.available_permits(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_cancels_job() {
        let coordinator = TaskCoordinator::current(2).unwrap();
        let job = coordinator.schedule(Uuid::new_v4(), |cancel: &AtomicBool| {
            let mut map = BoundedResultMap::unbounded();
            let mut i = 0u64;
            while !cancel.load(Ordering::SeqCst) {
                map.put("F", (i % 10).to_string());
                i += 1;
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(map)
        });

        let start = Instant::now();
        let outcome = coordinator
            .await_job(job, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_job_error_propagates() {
        let coordinator = TaskCoordinator::current(1).unwrap();
        let job = coordinator.schedule(Uuid::new_v4(), |_cancel: &AtomicBool| {
            Err(LookupError::Inconsistent("bad entry".into()))
        });
        let err = coordinator.await_job(job, None).await.unwrap_err();
        assert_eq!(err.code(), "EXPAND_INCONSISTENT_ENTRY");
    }

    #[tokio::test]
    async fn test_panicking_job_is_fatal() {
        let coordinator = TaskCoordinator::current(1).unwrap();
        let job = coordinator.schedule(Uuid::new_v4(), |_cancel: &AtomicBool| -> LookupResult<BoundedResultMap> {
            panic!("scan blew up")
        });
        let err = coordinator
            .await_job(job, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXPAND_TASK_FAILED");
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let coordinator = TaskCoordinator::current(1).unwrap();
        coordinator.shutdown();
        let job = coordinator.schedule(Uuid::new_v4(), counting_job(1));
        let err = coordinator.await_job(job, None).await.unwrap_err();
        assert!(matches!(err, LookupError::ExecutorShutdown));
        assert!(coordinator.is_shutdown());
    }
}
