//! Core types for the Quarry sandboxed snippet pipeline.
//!
//! Defines the snippet-language syntax (lexer, parser, tree), the capability
//! descriptor that scopes what a run may reference, the analysis report, the
//! outcome that crosses the pipeline boundary, and run audit records.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod capability;
pub mod error;
pub mod id;
pub mod outcome;
pub mod record;
pub mod report;
pub mod syntax;

pub use capability::{CapabilitySet, DEFAULT_CALLABLES, DEFAULT_MODULES};
pub use error::CoreError;
pub use id::{ContentHash, RunId};
pub use outcome::{FailureKind, Outcome, RenderedValue, WireOutcome};
pub use record::{RunRecord, RunStatus};
pub use report::{AnalysisReport, Violation, ViolationKind};
pub use syntax::{parse, Program};
