//! Backend that evaluates each job on its own OS thread.
//!
//! The interpreter is synchronous and may recurse deeply, so it runs on a
//! dedicated thread with a large stack rather than on the async runtime.
//! The caller awaits the result over a oneshot channel.
//!
//! A semaphore caps how many workers are alive at once. A job waits for a
//! permit before its thread starts, and the thread holds the permit until it
//! exits, so a cancelled worker still counts until it has actually stopped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use tokio::sync::{oneshot, Semaphore};

use crate::backend::{ExecutionBackend, ExecutionJob, ExecutionOutput};
use crate::ExecutorError;

const WORKER_NAME: &str = "quarry-worker";

/// Default number of worker threads allowed to run at once.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Runs every job on a fresh, named worker thread, at most `max_workers`
/// at a time. Clones share the same cap.
#[derive(Debug, Clone)]
pub struct ThreadBackend {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl Default for ThreadBackend {
    fn default() -> Self {
        Self::with_max_workers(DEFAULT_MAX_WORKERS)
    }
}

impl ThreadBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend running at most `max_workers` jobs at once (at least one).
    #[must_use]
    pub fn with_max_workers(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers that could start right now without waiting.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl ExecutionBackend for ThreadBackend {
    async fn execute(&self, job: ExecutionJob) -> Result<ExecutionOutput, ExecutorError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::WorkerLost)?;
        let (tx, rx) = oneshot::channel();
        let stack_size = job.limits().stack_size;
        thread::Builder::new()
            .name(WORKER_NAME.to_owned())
            .stack_size(stack_size)
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| job.run()))
                    .unwrap_or_else(|payload| Err(ExecutorError::WorkerPanicked(panic_message(&*payload))));
                drop(permit);
                // The receiver is gone when the caller timed out; nothing to report to.
                let _ = tx.send(result);
            })
            .map_err(ExecutorError::WorkerSpawn)?;
        rx.await.map_err(|_| ExecutorError::WorkerLost)?
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        let (tx, rx) = oneshot::channel();
        thread::Builder::new()
            .name(WORKER_NAME.to_owned())
            .spawn(move || {
                let _ = tx.send(());
            })
            .map_err(ExecutorError::WorkerSpawn)?;
        rx.await.map_err(|_| ExecutorError::WorkerLost)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quarry_core::CapabilitySet;

    use super::*;
    use crate::{CancelToken, Value};

    fn job(source: &str) -> ExecutionJob {
        let caps = Arc::new(CapabilitySet::default());
        match quarry_auditor::vet(source, &caps) {
            Ok(program) => ExecutionJob::new(program, caps),
            Err(report) => panic!("must vet: {}", report.summary()),
        }
    }

    #[tokio::test]
    async fn executes_on_a_worker_thread() {
        let out = ThreadBackend::new().execute(job("x = [i * i for i in range(4)]")).await;
        match out {
            Ok(out) => assert_eq!(out.namespace.get("x").map(Value::repr).as_deref(), Some("[0, 1, 4, 9]")),
            Err(e) => panic!("execute failed: {e}"),
        }
    }

    #[tokio::test]
    async fn runtime_errors_come_back_as_errors() {
        let out = ThreadBackend::new().execute(job("x = 1 / 0")).await;
        assert!(matches!(out, Err(ExecutorError::ZeroDivision(_))));
    }

    #[tokio::test]
    async fn jobs_beyond_the_cap_wait_for_a_free_worker() {
        let backend = ThreadBackend::with_max_workers(1);
        let cancel = CancelToken::new();
        let running = tokio::spawn({
            let backend = backend.clone();
            let job = job("while True:\n    pass").with_cancel(cancel.clone());
            async move { backend.execute(job).await }
        });
        while backend.idle_workers() > 0 {
            tokio::task::yield_now().await;
        }

        let queued = tokio::time::timeout(Duration::from_millis(100), backend.execute(job("x = 1"))).await;
        assert!(queued.is_err(), "a second job must wait while the only worker is busy");

        cancel.cancel();
        match running.await {
            Ok(out) => assert!(matches!(out, Err(ExecutorError::Cancelled | ExecutorError::StepLimit { .. }))),
            Err(e) => panic!("task failed: {e}"),
        }
        assert_eq!(backend.idle_workers(), 1, "the permit is released once the worker exits");
        assert!(backend.execute(job("x = 1")).await.is_ok());
    }

    #[test]
    fn worker_cap_is_at_least_one() {
        assert_eq!(ThreadBackend::with_max_workers(0).max_workers(), 1);
        assert_eq!(ThreadBackend::new().max_workers(), DEFAULT_MAX_WORKERS);
    }

    #[tokio::test]
    async fn health_check_spawns_a_thread() {
        assert!(ThreadBackend::new().health_check().await.is_ok());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*owned), "bang");
    }
}
