//! Error types for the executor crate.

use std::path::PathBuf;

use quarry_core::FailureKind;

/// Errors raised while evaluating a vetted program.
///
/// Runtime faults carry the conventional exception name as a prefix in their
/// message so callers see `ZeroDivisionError: division by zero` rather than
/// an internal variant name.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// A name was read before it was bound.
    #[error("NameError: name '{0}' is not defined")]
    Name(String),

    /// An operation was applied to a value of the wrong type.
    #[error("TypeError: {0}")]
    Type(String),

    /// A value had the right type but an unusable content.
    #[error("ValueError: {0}")]
    Value(String),

    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(String),

    #[error("IndexError: {0}")]
    Index(String),

    #[error("KeyError: {0}")]
    Key(String),

    #[error("AttributeError: {0}")]
    Attribute(String),

    #[error("ImportError: {0}")]
    Import(String),

    /// Integer arithmetic left the `i64` range.
    #[error("OverflowError: {0}")]
    Overflow(String),

    /// A table operation referenced a column that does not exist.
    #[error("ColumnNotFoundError: {0}")]
    ColumnNotFound(String),

    /// A callable exists but the capability set withholds it.
    #[error("PermissionError: '{name}' is not granted by the capability set")]
    NotGranted { name: String },

    /// A file read was attempted outside the data root, or with no data root.
    #[error("PermissionError: {reason}")]
    FileAccess { reason: String },

    /// Reading a granted data file failed.
    #[error("OSError: cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A data file is not well-formed CSV.
    #[error("ComputeError: malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    /// `break` or `continue` appeared outside a loop.
    #[error("SyntaxError: '{0}' outside loop")]
    LoopControl(&'static str),

    /// The instruction budget was exhausted.
    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: u64 },

    /// The run created more values than its allocation ceiling allows.
    #[error("allocation limit of {limit} cells exceeded")]
    AllocationLimit { limit: u64 },

    /// Nested lambda calls went deeper than allowed.
    #[error("RecursionError: call depth limit of {limit} exceeded")]
    CallDepth { limit: usize },

    /// A value or column expression nested deeper than allowed.
    #[error("RecursionError: nesting exceeds {limit} levels")]
    NestingDepth { limit: usize },

    /// The in-interpreter deadline passed.
    #[error("execution exceeded {limit_ms} ms")]
    Timeout { limit_ms: u128 },

    /// The run was cancelled from outside, usually by the pipeline timeout.
    #[error("execution cancelled")]
    Cancelled,

    /// The worker thread could not be started.
    #[error("failed to start worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The worker thread went away without reporting a result.
    #[error("worker exited without a result")]
    WorkerLost,

    /// The worker thread panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

impl ExecutorError {
    /// The pipeline failure category this error maps to.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } | Self::Cancelled => FailureKind::Timeout,
            _ => FailureKind::ExecutionError,
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub(crate) fn value_error(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }
}
