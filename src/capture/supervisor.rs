//! Supervision of one capture process under a hard wall-clock deadline.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};

use super::session::{CaptureOutcome, CaptureSession, CompletedCapture};
use super::tool::CaptureTool;
use crate::error_handling::types::CaptureError;

/// Runs capture sessions: one temp file, one child process, one deadline.
///
/// The supervisor never reports a session as complete before the child's exit
/// has been observed. When the deadline (or a shutdown request) fires it sends
/// SIGINT and waits; if the tool still runs after `kill_grace` it is killed and
/// reaped.
#[derive(Debug, Clone)]
pub struct CaptureSupervisor {
    tool: CaptureTool,
    tmp_dir: PathBuf,
    deadline: Duration,
    kill_grace: Duration,
    shutdown: watch::Receiver<bool>,
}

enum Trigger {
    Exited(io::Result<ExitStatus>),
    Deadline,
    Shutdown,
}

impl CaptureSupervisor {
    pub fn new(
        tool: CaptureTool,
        tmp_dir: PathBuf,
        deadline: Duration,
        kill_grace: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tool,
            tmp_dir,
            deadline,
            kill_grace,
            shutdown,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Starts a capture for `cycle` in the background.
    ///
    /// The result arrives exactly once on the returned receiver.
    pub fn launch(&self, cycle: u64) -> oneshot::Receiver<Result<CompletedCapture, CaptureError>> {
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.run_capture(cycle).await;
            if tx.send(result).is_err() {
                warn!("[cycle {}] Capture finished but nobody is waiting for it", cycle);
            }
        });
        rx
    }

    /// Runs one capture session to completion and returns its artifact path.
    pub async fn run_capture(&self, cycle: u64) -> Result<CompletedCapture, CaptureError> {
        let mut session = CaptureSession::create(cycle, &self.tmp_dir, self.deadline)?;

        info!(
            "[{}] Starting capture run for cycle {} (deadline {:?})",
            session.id, cycle, self.deadline
        );
        let mut child = match self.tool.write_command(&session.trace_path).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    "[{}] Failed to start {}: {}",
                    session.id, self.tool.program, e
                );
                let _ = std::fs::remove_file(&session.trace_path);
                return Err(CaptureError::SpawnFailed(e));
            }
        };
        session.pid = child.id();
        debug!("[{}] Capture process pid {:?}", session.id, session.pid);

        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr).lines();
            let sid = session.id;
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[{}][stderr] {}", sid, line);
                }
                debug!("[{}] stderr monitoring ended", sid);
            });
        }

        let mut shutdown = self.shutdown.clone();
        let trigger = tokio::select! {
            status = child.wait() => Trigger::Exited(status),
            _ = tokio::time::sleep(self.deadline) => Trigger::Deadline,
            _ = wait_for_shutdown(&mut shutdown) => Trigger::Shutdown,
        };

        let outcome = match trigger {
            Trigger::Exited(status) => {
                let status = status.map_err(CaptureError::WaitFailed)?;
                warn!(
                    "[{}] Capture process exited before the deadline: {}",
                    session.id, status
                );
                if !status.success() {
                    session.outcome = Some(CaptureOutcome::Failed);
                    error!(
                        "[{}] Capture tool failed, environment is likely broken",
                        session.id
                    );
                    return Err(CaptureError::UnexpectedExit(status));
                }
                CaptureOutcome::CompletedNaturally
            }
            Trigger::Deadline => {
                self.interrupt_and_reap(&session, &mut child, CaptureOutcome::TerminatedOnDeadline)
                    .await?
            }
            Trigger::Shutdown => {
                info!("[{}] Shutdown requested, stopping capture early", session.id);
                self.interrupt_and_reap(&session, &mut child, CaptureOutcome::StoppedOnShutdown)
                    .await?
            }
        };

        session.outcome = Some(outcome);
        info!(
            "[{}] Finished capture run for cycle {} ({:?})",
            session.id, cycle, outcome
        );
        Ok(session.complete(outcome))
    }

    /// Sends SIGINT and blocks until the exit is observed, killing the child
    /// if it outlives the grace period.
    async fn interrupt_and_reap(
        &self,
        session: &CaptureSession,
        child: &mut Child,
        interrupted: CaptureOutcome,
    ) -> Result<CaptureOutcome, CaptureError> {
        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                child.wait().await.map_err(CaptureError::WaitFailed)?;
                return Ok(interrupted);
            }
        };

        debug!("[{}] Sending SIGINT to pid {}", session.id, pid);
        send_interrupt(pid).map_err(|e| {
            error!("[{}] Failed to interrupt pid {}: {}", session.id, pid, e);
            CaptureError::SignalFailed(e)
        })?;

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(CaptureError::WaitFailed)?;
                debug!("[{}] Capture process stopped: {}", session.id, status);
                Ok(interrupted)
            }
            Err(_) => {
                warn!(
                    "[{}] Capture process ignored SIGINT for {:?}, killing it",
                    session.id, self.kill_grace
                );
                child.kill().await.map_err(|e| {
                    error!("[{}] Failed to kill pid {}: {}", session.id, pid, e);
                    CaptureError::SignalFailed(e)
                })?;
                Ok(CaptureOutcome::ForceKilled)
            }
        }
    }
}

fn send_interrupt(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if unsafe { libc::kill(pid, libc::SIGINT) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
