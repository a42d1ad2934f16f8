//! Per-run accounting of steps, allocations, wall-clock time and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::{ExecutionLimits, ExecutorError};

/// How many steps pass between wall-clock checks.
const CLOCK_INTERVAL: u64 = 256;

/// Shared flag that asks a running interpreter to stop at its next step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters owned by one interpreter.
#[derive(Debug)]
pub(crate) struct Budget {
    steps: u64,
    max_steps: u64,
    cells: u64,
    max_cells: u64,
    started: Instant,
    limits_timeout_ms: u128,
    deadline: Instant,
    cancel: CancelToken,
}

impl Budget {
    pub(crate) fn new(limits: &ExecutionLimits, cancel: CancelToken) -> Self {
        let started = Instant::now();
        Self {
            steps: 0,
            max_steps: limits.max_steps,
            cells: 0,
            max_cells: limits.max_cells,
            started,
            limits_timeout_ms: limits.timeout.as_millis(),
            deadline: started + limits.timeout,
            cancel,
        }
    }

    /// Account for one interpreter step.
    pub(crate) fn tick(&mut self) -> Result<(), ExecutorError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ExecutorError::StepLimit {
                limit: self.max_steps,
            });
        }
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        if self.steps % CLOCK_INTERVAL == 0 {
            self.check_clock()?;
        }
        Ok(())
    }

    /// Check cancellation and the deadline without consuming a step. Used
    /// inside bulk table operations.
    pub(crate) fn checkpoint(&self) -> Result<(), ExecutorError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        self.check_clock()
    }

    /// Reserve `cells` against the allocation ceiling before creating them.
    pub(crate) fn charge(&mut self, cells: usize) -> Result<(), ExecutorError> {
        let cells = u64::try_from(cells).unwrap_or(u64::MAX);
        self.cells = self.cells.saturating_add(cells);
        if self.cells > self.max_cells {
            return Err(ExecutorError::AllocationLimit {
                limit: self.max_cells,
            });
        }
        Ok(())
    }

    /// Fail if `cells` more would exceed the ceiling, without reserving them.
    /// Used to bound an output whose exact size is only known once built.
    pub(crate) fn ensure_room(&self, cells: usize) -> Result<(), ExecutorError> {
        let cells = u64::try_from(cells).unwrap_or(u64::MAX);
        if self.cells.saturating_add(cells) > self.max_cells {
            return Err(ExecutorError::AllocationLimit {
                limit: self.max_cells,
            });
        }
        Ok(())
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    pub(crate) fn cells(&self) -> u64 {
        self.cells
    }

    pub(crate) fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    fn check_clock(&self) -> Result<(), ExecutorError> {
        if Instant::now() >= self.deadline {
            return Err(ExecutorError::Timeout {
                limit_ms: self.limits_timeout_ms,
            });
        }
        Ok(())
    }
}
