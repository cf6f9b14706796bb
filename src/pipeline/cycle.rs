use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::oneshot;

use crate::error_handling::types::{StatsError, UploadError};
use crate::stats::{StatsCollector, StatsReport};
use crate::upload::{ArtifactUploader, UploadReceipt};

/// Where a cycle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Capturing,
    Dispatched,
    Closed,
}

/// Completion flags for one dispatched artifact.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleRecord {
    pub upload_done: bool,
    pub stats_done: bool,
}

impl CycleRecord {
    pub fn is_complete(&self) -> bool {
        self.upload_done && self.stats_done
    }
}

/// How a dispatched cycle closed.
#[derive(Debug)]
pub struct CycleOutcome {
    pub cycle: u64,
    pub trace_path: PathBuf,
    /// `None` when the upload never reported before the handling timeout.
    pub upload: Option<Result<UploadReceipt, UploadError>>,
    /// `None` when the stats pass never reported before the handling timeout.
    /// `Some(Err(_))` only when the stats task itself died.
    pub stats: Option<Result<StatsReport, StatsError>>,
    pub deleted: bool,
    pub timed_out: bool,
}

impl CycleOutcome {
    pub fn upload_succeeded(&self) -> bool {
        matches!(self.upload, Some(Ok(_)))
    }
}

/// Fans a finished artifact out to the uploader and the stats collector and
/// closes the cycle once both report, or once `timeout` elapses.
///
/// The local file is deleted here and only here: after a confirmed upload
/// and after the stats pass is done reading (or has been cancelled).
pub struct CycleHandler {
    uploader: Arc<ArtifactUploader>,
    stats: Arc<StatsCollector>,
    timeout: Duration,
}

impl CycleHandler {
    pub fn new(uploader: Arc<ArtifactUploader>, stats: Arc<StatsCollector>, timeout: Duration) -> Self {
        Self {
            uploader,
            stats,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn handle(&self, cycle: u64, trace_path: PathBuf) -> CycleOutcome {
        info!("[cycle {}] Dispatching {}", cycle, trace_path.display());

        let (upload_tx, mut upload_rx) = oneshot::channel();
        let uploader = self.uploader.clone();
        let path = trace_path.clone();
        let upload_task = tokio::spawn(async move {
            let _ = upload_tx.send(uploader.upload(cycle, &path).await);
        });

        let (stats_tx, mut stats_rx) = oneshot::channel();
        let stats = self.stats.clone();
        let path = trace_path.clone();
        let stats_task = tokio::spawn(async move {
            let _ = stats_tx.send(Ok(stats.summarize(cycle, &path).await));
        });

        let mut record = CycleRecord::default();
        let mut upload = None;
        let mut stats = None;
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let timed_out = loop {
            if record.is_complete() {
                break false;
            }
            tokio::select! {
                result = &mut upload_rx, if !record.upload_done => {
                    record.upload_done = true;
                    upload = Some(result.unwrap_or_else(|e| Err(UploadError::TaskFailed(e.to_string()))));
                    debug!("[cycle {}] Upload reported", cycle);
                }
                result = &mut stats_rx, if !record.stats_done => {
                    record.stats_done = true;
                    stats = Some(result.unwrap_or_else(|e| Err(StatsError::TaskFailed(e.to_string()))));
                    debug!("[cycle {}] Stats reported", cycle);
                }
                _ = &mut deadline => break true,
            }
        };

        if timed_out {
            error!(
                "[cycle {}] Handling not closed within {:?} (upload done: {}, stats done: {})",
                cycle, self.timeout, record.upload_done, record.stats_done
            );
            upload_task.abort();
            stats_task.abort();
            // Let the aborted stats pass drop its child before touching the file.
            let _ = stats_task.await;
        }

        let deleted = match &upload {
            Some(Ok(_)) => remove_artifact(cycle, &trace_path).await,
            Some(Err(e)) => {
                error!(
                    "[cycle {}] Keeping {} for manual recovery: {}",
                    cycle,
                    trace_path.display(),
                    e
                );
                false
            }
            None => {
                error!(
                    "[cycle {}] Keeping {} for manual recovery: upload did not finish",
                    cycle,
                    trace_path.display()
                );
                false
            }
        };

        match &stats {
            Some(Ok(report)) => {
                for e in report.failures() {
                    warn!("[cycle {}] Stats report failed: {}", cycle, e);
                }
            }
            Some(Err(e)) => warn!("[cycle {}] Stats pass failed: {}", cycle, e),
            None => {}
        }

        info!(
            "[cycle {}] Closed (uploaded: {}, deleted: {}, timed out: {})",
            cycle,
            matches!(upload, Some(Ok(_))),
            deleted,
            timed_out
        );

        CycleOutcome {
            cycle,
            trace_path,
            upload,
            stats,
            deleted,
            timed_out,
        }
    }
}

async fn remove_artifact(cycle: u64, path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("[cycle {}] Removed {}", cycle, path.display());
            true
        }
        Err(e) => {
            warn!(
                "[cycle {}] Upload is durable but {} could not be removed: {}",
                cycle,
                path.display(),
                e
            );
            false
        }
    }
}
