//! Periodic task scheduler
//!
//! Each scheduled task gets its own tokio task driven by an interval. A task
//! body runs to completion before the next tick is awaited, so one task
//! never overlaps itself; ticks missed while it was running are skipped
//! rather than bunched up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{Error, Result};

/// Work invoked on every tick
pub trait PeriodicTask: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run one tick
    fn run(&self);
}

/// Handle of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Scheduler bound to the tokio runtime it was started on
#[derive(Debug)]
pub struct TaskRunner {
    runtime: Handle,
    tasks: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TaskRunner {
    /// Bind to the current tokio runtime.
    ///
    /// Fails with [`Error::NotReady`] outside a runtime.
    pub fn start() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::NotReady(format!("task runner has no runtime: {}", e)))?;

        Ok(Self {
            runtime,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Run `task` every `period`, first after one full period
    pub fn schedule(&self, period: Duration, task: Arc<dyn PeriodicTask>) -> Result<TaskId> {
        if period.is_zero() {
            return Err(Error::configuration(task.name(), "period must be positive"));
        }

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::info!(task = %id, name = task.name(), period_ms = period.as_millis() as u64, "Task scheduled");

        let handle = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task.run();
            }
        });

        self.tasks.lock().insert(id, handle);
        Ok(id)
    }

    /// Stop a task. Once this returns the task will not run again.
    ///
    /// Returns false if the task was not scheduled.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let Some(handle) = self.tasks.lock().remove(&id) else {
            return false;
        };

        handle.abort();
        // The body has no await points, so the abort lands between ticks
        let _ = handle.await;

        tracing::info!(task = %id, "Task cancelled");
        true
    }

    /// Cancel every task and wait for them to stop
    pub async fn shutdown(&self) {
        let handles: Vec<(TaskId, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        for (_, handle) in &handles {
            handle.abort();
        }
        for (id, handle) in handles {
            let _ = handle.await;
            tracing::debug!(task = %id, "Task drained");
        }
    }

    /// Number of scheduled tasks
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    struct Counter {
        runs: AtomicU64,
    }

    impl PeriodicTask for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            runs: AtomicU64::new(0),
        })
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let err = TaskRunner::start().unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_periodically() {
        let runner = assert_ok!(TaskRunner::start());
        let task = counter();
        assert_ok!(runner.schedule(Duration::from_millis(10), task.clone()));

        tokio::time::sleep(Duration::from_millis(55)).await;
        let runs = task.runs.load(Ordering::SeqCst);
        assert!((4..=5).contains(&runs), "ran {} times", runs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs_again() {
        let runner = TaskRunner::start().unwrap();
        let task = counter();
        let id = runner.schedule(Duration::from_millis(10), task.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(runner.cancel(id).await);
        let after_cancel = task.runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), after_cancel);
        assert_eq!(runner.task_count(), 0);

        // Second cancel has nothing to stop
        assert!(!runner.cancel(id).await);
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let runner = TaskRunner::start().unwrap();
        let result = runner.schedule(Duration::ZERO, counter());
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_all() {
        let runner = TaskRunner::start().unwrap();
        let a = counter();
        let b = counter();
        runner.schedule(Duration::from_millis(5), a.clone()).unwrap();
        runner.schedule(Duration::from_millis(7), b.clone()).unwrap();
        assert_eq!(runner.task_count(), 2);

        runner.shutdown().await;
        assert_eq!(runner.task_count(), 0);

        let (ra, rb) = (a.runs.load(Ordering::SeqCst), b.runs.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.runs.load(Ordering::SeqCst), ra);
        assert_eq!(b.runs.load(Ordering::SeqCst), rb);
    }
}
