//! Diagnostic statistics over finished traces.
//!
//! Runs the capture tool in report mode (top processes by CPU, then by
//! network) and logs the text. Failures here never block artifact durability.

pub mod collector;

pub use collector::{StatsCollector, StatsReport, CPU_CHISEL, NET_CHISEL};
