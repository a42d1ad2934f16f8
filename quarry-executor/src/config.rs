//! Resource limits applied to every run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wall-clock bound for one run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default instruction budget: one step per statement and expression node.
pub const DEFAULT_MAX_STEPS: u64 = 20_000_000;

/// Default allocation ceiling, counted in created cells (collection slots,
/// table cells and string bytes) over the whole run.
pub const DEFAULT_MAX_CELLS: u64 = 50_000_000;

/// Default lambda call depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Default worker stack size: 64 MiB.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Bounds on time, work and memory for a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ExecutionLimits {
    /// Wall-clock bound, enforced both by the pipeline and inside the interpreter.
    pub timeout: Duration,

    /// Maximum interpreter steps.
    pub max_steps: u64,

    /// Maximum cells created over the run.
    pub max_cells: u64,

    /// Maximum nesting of lambda calls.
    pub max_call_depth: usize,

    /// Stack size of the worker thread in bytes.
    pub stack_size: usize,
}

impl ExecutionLimits {
    /// Default limits with a custom timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_steps: DEFAULT_MAX_STEPS,
            max_cells: DEFAULT_MAX_CELLS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_timeout_keeps_other_defaults() {
        let limits = ExecutionLimits::with_timeout(Duration::from_millis(250));
        assert_eq!(limits.timeout, Duration::from_millis(250));
        assert_eq!(limits.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(limits.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn partial_limits_deserialize_with_defaults() {
        let limits: ExecutionLimits = match serde_json::from_str(r#"{"max_steps": 100}"#) {
            Ok(l) => l,
            Err(e) => panic!("limits must deserialize: {e}"),
        };
        assert_eq!(limits.max_steps, 100);
        assert_eq!(limits.timeout, DEFAULT_TIMEOUT);
    }
}
