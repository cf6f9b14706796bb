//! Orchestration of capture cycles.
//!
//! A cycle moves `Capturing -> Dispatched -> Closed`. The [`Coordinator`]
//! keeps exactly one capture running and hands each finished trace to a
//! [`CycleHandler`], which runs the upload and the stats pass concurrently
//! and closes the cycle when both have reported or its timeout elapses.

pub mod coordinator;
pub mod cycle;

pub use coordinator::{Coordinator, PipelineStats};
pub use cycle::{CycleHandler, CycleOutcome, CycleRecord, CycleState};
