//! Capture subsystem.
//!
//! Launches the trace-capture tool against a fresh temp file, enforces the
//! capture deadline and guarantees the process is reaped before the trace file
//! is handed on.
//!
//! Re-exports:
//! - [`CaptureSupervisor`]: runs one session per call, asynchronously.
//! - [`CaptureSession`], [`CompletedCapture`], [`CaptureOutcome`]: session types.
//! - [`CaptureTool`]: how the external tool is invoked.

pub mod session;
pub mod supervisor;
pub mod tool;

pub use session::{CaptureOutcome, CaptureSession, CompletedCapture};
pub use supervisor::CaptureSupervisor;
pub use tool::CaptureTool;
