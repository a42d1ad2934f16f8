//! The analyze → execute → serialize pipeline behind `execute_code`.
//!
//! Every run is independent: the pipeline holds only an immutable
//! capability set, limits and a backend. No namespace survives a run.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use quarry_core::{CapabilitySet, FailureKind, Outcome, RunId, RunRecord, RunStatus};

use crate::backend::{ExecutionBackend, ExecutionJob};
use crate::{serializer, CancelToken, ExecutionLimits, Value};

/// Per-call overrides for [`Pipeline::run_with`].
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct RunOptions {
    /// Replaces the pipeline's capability set for this run.
    pub capabilities: Option<Arc<CapabilitySet>>,
    /// Names bound before the first statement runs.
    pub bindings: Vec<(String, Value)>,
    /// Replaces the pipeline's limits for this run.
    pub limits: Option<ExecutionLimits>,
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = Some(Arc::new(capabilities));
        self
    }

    #[must_use]
    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.push((name.into(), value));
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Runs untrusted snippets through the static gate, the restricted
/// executor and the result serializer.
///
/// # Cancel Safety
/// Dropping a `run` future stops waiting for the worker but does not cancel
/// it; the worker still stops at its own deadline.
pub struct Pipeline<B: ExecutionBackend> {
    backend: B,
    capabilities: Arc<CapabilitySet>,
    limits: ExecutionLimits,
}

impl<B: ExecutionBackend> Pipeline<B> {
    /// A pipeline with the default capability set and limits.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            capabilities: Arc::new(CapabilitySet::default()),
            limits: ExecutionLimits::default(),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = Arc::new(capabilities);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    #[must_use]
    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `source` with the pipeline's own policy.
    pub async fn run(&self, source: &str) -> Outcome {
        self.run_with(source, RunOptions::default()).await
    }

    /// Run `source` with per-call overrides.
    pub async fn run_with(&self, source: &str, options: RunOptions) -> Outcome {
        self.run_recorded(source, options).await.0
    }

    /// Run `source` and also return the record of the run.
    pub async fn run_recorded(&self, source: &str, options: RunOptions) -> (Outcome, RunRecord) {
        let id = RunId::new();
        let started_at = Utc::now();
        let wall_start = Instant::now();
        let capabilities = options.capabilities.unwrap_or_else(|| Arc::clone(&self.capabilities));
        let limits = options.limits.unwrap_or_else(|| self.limits.clone());
        let source_hash = quarry_core::ContentHash::of(source.as_bytes());

        let outcome = match quarry_auditor::vet(source, &capabilities) {
            Err(report) if report.is_syntax_error() => {
                let message = report
                    .violations
                    .iter()
                    .map(|v| v.reason.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                Outcome::failure(FailureKind::SyntaxError, message)
            }
            Err(report) => {
                tracing::info!(run = %id, violations = report.violations.len(), "snippet rejected");
                Outcome::failure(FailureKind::UnsafeCode, report.summary())
            }
            Ok(program) => {
                let job = ExecutionJob::new(program, capabilities)
                    .with_bindings(options.bindings)
                    .with_limits(limits.clone());
                self.execute(id, job, &limits).await
            }
        };

        let record = RunRecord::new(id, source_hash, started_at, wall_start.elapsed(), RunStatus::from(&outcome));
        tracing::info!(
            run = %record.id,
            source_hash = %record.source_hash,
            status = ?record.status,
            elapsed_ms = record.duration.as_millis(),
            "run finished"
        );
        (outcome, record)
    }

    async fn execute(&self, id: RunId, job: ExecutionJob, limits: &ExecutionLimits) -> Outcome {
        let cancel: CancelToken = job.cancel_token();
        let source = job.program().source().to_owned();
        match tokio::time::timeout(limits.timeout, self.backend.execute(job)).await {
            Err(_elapsed) => {
                cancel.cancel();
                tracing::warn!(run = %id, timeout_ms = limits.timeout.as_millis(), "run timed out");
                Outcome::failure(
                    FailureKind::Timeout,
                    format!("execution exceeded {} ms", limits.timeout.as_millis()),
                )
            }
            Ok(Err(e)) => {
                tracing::debug!(run = %id, error = %e, "run failed");
                Outcome::failure(e.failure_kind(), e.to_string())
            }
            Ok(Ok(output)) => {
                if !output.stdout.is_empty() {
                    tracing::debug!(run = %id, stdout = %output.stdout, "captured output");
                }
                serializer::extract(&source, &output.namespace)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::ExecutionOutput;
    use crate::{ExecutorError, ThreadBackend};

    struct AlwaysFailBackend;

    #[async_trait]
    impl ExecutionBackend for AlwaysFailBackend {
        async fn execute(&self, _job: ExecutionJob) -> Result<ExecutionOutput, ExecutorError> {
            Err(ExecutorError::WorkerLost)
        }

        async fn health_check(&self) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    struct NeverFinishesBackend;

    #[async_trait]
    impl ExecutionBackend for NeverFinishesBackend {
        async fn execute(&self, _job: ExecutionJob) -> Result<ExecutionOutput, ExecutorError> {
            std::future::pending().await
        }

        async fn health_check(&self) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn syntax_errors_are_not_reported_as_unsafe() {
        let outcome = Pipeline::new(AlwaysFailBackend).run("x = = 1").await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::SyntaxError));
    }

    #[tokio::test]
    async fn backend_errors_become_execution_errors() {
        let outcome = Pipeline::new(AlwaysFailBackend).run("x = 1").await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ExecutionError));
    }

    #[tokio::test]
    async fn stuck_backend_is_cut_off_by_the_timeout() {
        let pipeline = Pipeline::new(NeverFinishesBackend)
            .with_limits(ExecutionLimits::with_timeout(Duration::from_millis(50)));
        let outcome = pipeline.run("x = 1").await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(outcome.message(), Some("execution exceeded 50 ms"));
    }

    #[tokio::test]
    async fn per_call_capabilities_override_the_default() {
        let pipeline = Pipeline::new(ThreadBackend::new());
        let narrow = RunOptions::new().with_capabilities(CapabilitySet::default().without_callable("len"));
        let outcome = pipeline.run_with("n = len([1])", narrow).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::UnsafeCode));
        assert!(pipeline.run("n = len([1])").await.is_success());
    }

    #[tokio::test]
    async fn bindings_reach_the_program() {
        let pipeline = Pipeline::new(ThreadBackend::new());
        let options = RunOptions::new().with_binding("base", Value::Int(40));
        let outcome = pipeline.run_with("answer = base + 2\nanswer", options).await;
        assert_eq!(outcome.value().map(|v| v.type_name().to_owned()).as_deref(), Some("int"));
    }

    #[tokio::test]
    async fn records_follow_the_outcome() {
        let pipeline = Pipeline::new(ThreadBackend::new());
        let (outcome, record) = pipeline.run_recorded("import os", RunOptions::new()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::UnsafeCode));
        assert_eq!(record.status, RunStatus::Rejected);
        assert_eq!(record.source_hash, quarry_core::ContentHash::of(b"import os"));

        let (_, record) = pipeline.run_recorded("x = 1", RunOptions::new()).await;
        assert_eq!(record.status, RunStatus::Completed);
    }
}
