//! Static safety analysis for Quarry snippets.
//!
//! [`analyze`] produces an [`AnalysisReport`](quarry_core::AnalysisReport);
//! [`vet`] additionally hands back a [`VettedProgram`] when the report is
//! clean. The executor accepts nothing else, so unvetted source cannot reach
//! evaluation.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod analyzer;
pub mod vetted;

pub use analyzer::{analyze, check_program, vet};
pub use vetted::VettedProgram;
