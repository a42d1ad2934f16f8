//! HTTP API gateway for the Quarry snippet pipeline.
//!
//! Exposes `POST /v1/execute`, which runs one snippet through the
//! analyze → execute → serialize pipeline, and a `GET /health` probe.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod routes;
