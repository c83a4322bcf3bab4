//! Worker runtime: reserves work items, drives the pipeline, and writes
//! each job's single terminal status. Includes the reaper for stale
//! pending jobs and expired reservations.

pub mod recovery;
pub mod runtime;

pub use recovery::Reaper;
pub use runtime::{RuntimeConfig, WorkerRuntime};
