use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error};
use uuid::Uuid;

use crate::error_handling::types::CaptureError;

/// Temp file prefix for trace artifacts.
pub const TRACE_PREFIX: &str = "roadcrew_";
/// Temp file suffix for trace artifacts.
pub const TRACE_SUFFIX: &str = ".scap";

/// How a capture session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The tool exited successfully on its own before the deadline.
    CompletedNaturally,
    /// The deadline elapsed, the tool was interrupted and its exit observed.
    TerminatedOnDeadline,
    /// Shutdown was requested, the tool was interrupted and its exit observed.
    StoppedOnShutdown,
    /// The tool ignored the interrupt for the whole grace period and was killed.
    ForceKilled,
    /// The tool exited with an error status on its own.
    Failed,
}

/// One timed run of the capture tool.
///
/// The session owns its trace path until completion; afterwards only the
/// path travels on, inside a [`CompletedCapture`].
#[derive(Debug)]
pub struct CaptureSession {
    pub id: Uuid,
    pub cycle: u64,
    pub trace_path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub deadline: Duration,
    pub pid: Option<u32>,
    pub outcome: Option<CaptureOutcome>,
}

impl CaptureSession {
    /// Creates the session and its uniquely named, empty trace file in `tmp_dir`.
    pub fn create(cycle: u64, tmp_dir: &Path, deadline: Duration) -> Result<Self, CaptureError> {
        let id = Uuid::new_v4();
        let trace_path = tempfile::Builder::new()
            .prefix(TRACE_PREFIX)
            .suffix(TRACE_SUFFIX)
            .tempfile_in(tmp_dir)
            .and_then(|file| file.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|e| {
                error!(
                    "[{}] Failed to create trace file in {}: {}",
                    id,
                    tmp_dir.display(),
                    e
                );
                CaptureError::TempFileFailed(e)
            })?;

        debug!("[{}] Created trace file {}", id, trace_path.display());
        Ok(Self {
            id,
            cycle,
            trace_path,
            start_time: Utc::now(),
            deadline,
            pid: None,
            outcome: None,
        })
    }

    /// Hands the trace path over; the session object ends here.
    pub fn complete(self, outcome: CaptureOutcome) -> CompletedCapture {
        CompletedCapture {
            cycle: self.cycle,
            session_id: self.id,
            trace_path: self.trace_path,
            outcome,
            duration: Utc::now() - self.start_time,
        }
    }
}

/// Result of a finished capture session, handed to the coordinator.
#[derive(Debug, Clone)]
pub struct CompletedCapture {
    pub cycle: u64,
    pub session_id: Uuid,
    pub trace_path: PathBuf,
    pub outcome: CaptureOutcome,
    pub duration: chrono::Duration,
}
