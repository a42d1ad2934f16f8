//! Restricted execution of vetted snippets.
//!
//! Programs that passed `quarry-auditor` are evaluated by a structural
//! interpreter that can only reach what the capability set grants. Runs are
//! bounded in time, steps and allocations, execute on a dedicated worker
//! thread, and leave behind an owned [`Namespace`] that the [`serializer`]
//! turns into an [`Outcome`](quarry_core::Outcome). [`Pipeline`] ties the
//! stages together.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

mod args;
mod budget;
mod builtins;
mod data;
mod format;
mod index;
mod interpreter;
mod methods;
mod ops;

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod namespace;
pub mod pipeline;
pub mod serializer;
pub mod value;
pub mod worker;

pub use backend::{ExecutionBackend, ExecutionJob, ExecutionOutput};
pub use budget::CancelToken;
pub use config::ExecutionLimits;
pub use error::ExecutorError;
pub use frame::{AggFunc, ColumnExpr, GroupBy, JoinKind, Table};
pub use interpreter::execute;
pub use namespace::Namespace;
pub use pipeline::{Pipeline, RunOptions};
pub use serializer::extract;
pub use value::Value;
pub use worker::{ThreadBackend, DEFAULT_MAX_WORKERS};
