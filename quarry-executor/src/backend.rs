//! Execution backend abstraction.
//!
//! The pipeline hands a backend a self-contained [`ExecutionJob`]; where the
//! job runs (a worker thread today) is the backend's business.

use std::sync::Arc;

use async_trait::async_trait;
use quarry_auditor::VettedProgram;
use quarry_core::CapabilitySet;

use crate::{interpreter, CancelToken, ExecutionLimits, ExecutorError, Namespace, Value};

/// Everything one run needs, owned so it can move to another thread.
#[derive(Debug)]
pub struct ExecutionJob {
    program: VettedProgram,
    capabilities: Arc<CapabilitySet>,
    bindings: Vec<(String, Value)>,
    limits: ExecutionLimits,
    cancel: CancelToken,
}

impl ExecutionJob {
    /// A job with no extra bindings, default limits and a fresh cancel token.
    #[must_use]
    pub fn new(program: VettedProgram, capabilities: Arc<CapabilitySet>) -> Self {
        Self {
            program,
            capabilities,
            bindings: Vec::new(),
            limits: ExecutionLimits::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Pre-bind names in the run's namespace.
    #[must_use]
    pub fn with_bindings(mut self, bindings: Vec<(String, Value)>) -> Self {
        self.bindings = bindings;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn program(&self) -> &VettedProgram {
        &self.program
    }

    #[must_use]
    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// A handle that cancels this job once it is running.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Evaluate the job on the current thread.
    ///
    /// # Errors
    /// Any runtime fault, limit breach or cancellation raised by the program.
    pub fn run(self) -> Result<ExecutionOutput, ExecutorError> {
        interpreter::execute(
            &self.program,
            &self.capabilities,
            self.bindings,
            &self.limits,
            self.cancel,
        )
    }
}

/// The state a finished run leaves behind.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ExecutionOutput {
    /// Global bindings after the last statement.
    pub namespace: Namespace,
    /// Everything the program printed.
    pub stdout: String,
}

impl ExecutionOutput {
    #[must_use]
    pub fn new(namespace: Namespace, stdout: String) -> Self {
        Self { namespace, stdout }
    }
}

/// Where vetted programs are evaluated.
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Cancel Safety
/// Dropping an `execute` future abandons the result but does not stop the
/// evaluation; callers that give up on a job must also cancel its token.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run `job` to completion.
    ///
    /// # Errors
    /// Returns the program's runtime error, [`ExecutorError::Cancelled`] when
    /// the job's token fires, or a worker error when the backend itself fails.
    async fn execute(&self, job: ExecutionJob) -> Result<ExecutionOutput, ExecutorError>;

    /// Check that the backend can accept jobs.
    ///
    /// # Errors
    /// Returns a worker error if a job could not be started.
    async fn health_check(&self) -> Result<(), ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(source: &str) -> ExecutionJob {
        let caps = Arc::new(CapabilitySet::default());
        match quarry_auditor::vet(source, &caps) {
            Ok(program) => ExecutionJob::new(program, caps),
            Err(report) => panic!("must vet: {}", report.summary()),
        }
    }

    #[test]
    fn job_runs_inline() {
        let out = match job("x = 2 ** 10").run() {
            Ok(out) => out,
            Err(e) => panic!("run failed: {e}"),
        };
        assert!(matches!(out.namespace.get("x"), Some(Value::Int(1024))));
    }

    #[test]
    fn bindings_are_visible_to_the_program() {
        let out = job("y = seed + 1")
            .with_bindings(vec![("seed".to_owned(), Value::Int(41))])
            .run();
        assert!(out.is_ok_and(|o| matches!(o.namespace.get("y"), Some(Value::Int(42)))));
    }

    #[test]
    fn cancelled_job_stops() {
        let job = job("while True:\n    pass");
        job.cancel_token().cancel();
        assert!(matches!(job.run(), Err(ExecutorError::Cancelled)));
    }
}
