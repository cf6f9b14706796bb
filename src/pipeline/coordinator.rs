use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinSet};

use super::cycle::{CycleHandler, CycleOutcome, CycleState};
use crate::capture::supervisor::wait_for_shutdown;
use crate::capture::{CaptureSupervisor, CompletedCapture};
use crate::configuration::PipelineConfig;
use crate::error_handling::policy::{Backoff, Classified, ErrorPolicy};
use crate::error_handling::types::{CaptureError, PipelineError};
use crate::stats::StatsCollector;
use crate::upload::{ArtifactUploader, ObjectStore};

type CaptureReceiver = oneshot::Receiver<Result<CompletedCapture, CaptureError>>;
/// A closed cycle's id with its handler's result; the id survives a handler panic.
type ClosedCycle = (u64, Result<CycleOutcome, JoinError>);

/// Running counters, logged after every closed cycle and returned by [`Coordinator::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles_captured: u64,
    pub cycles_closed: u64,
    pub uploads_completed: u64,
    pub uploads_failed: u64,
    pub stats_failures: u64,
    pub timed_out: u64,
    pub artifacts_deleted: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured={} closed={} uploaded={} upload_failures={} stats_failures={} timed_out={} deleted={}",
            self.cycles_captured,
            self.cycles_closed,
            self.uploads_completed,
            self.uploads_failed,
            self.stats_failures,
            self.timed_out,
            self.artifacts_deleted
        )
    }
}

/// The capture loop.
///
/// Exactly one capture runs at a time. As soon as a capture finishes the next
/// one is launched, and only then is the finished artifact dispatched to its
/// own [`CycleHandler`] task. At most `max_in_flight` dispatched cycles may be
/// open at once; at the bound, the next capture waits for one to close.
pub struct Coordinator {
    supervisor: CaptureSupervisor,
    handler: Arc<CycleHandler>,
    max_in_flight: usize,
    shutdown: watch::Receiver<bool>,
    cycles: BTreeMap<u64, CycleState>,
    stats: PipelineStats,
}

impl Coordinator {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn ObjectStore>,
        hostname: String,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let supervisor = CaptureSupervisor::new(
            config.capture.clone(),
            config.tmp_dir.clone(),
            config.capture_interval,
            config.kill_grace,
            shutdown.clone(),
        );
        let uploader = ArtifactUploader::new(
            store,
            hostname,
            config.upload_attempts,
            Backoff::new(config.retry_delay),
        );
        let collector = StatsCollector::new(config.capture.clone());
        let handler = CycleHandler::new(
            Arc::new(uploader),
            Arc::new(collector),
            config.handling_timeout,
        );
        Self::from_parts(supervisor, handler, config.max_in_flight, shutdown)
    }

    pub fn from_parts(
        supervisor: CaptureSupervisor,
        handler: CycleHandler,
        max_in_flight: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            supervisor,
            handler: Arc::new(handler),
            max_in_flight: max_in_flight.max(1),
            shutdown,
            cycles: BTreeMap::new(),
            stats: PipelineStats::default(),
        }
    }

    /// Runs until shutdown is requested or a fatal error occurs.
    ///
    /// On shutdown the running capture is stopped early and still dispatched,
    /// then every open cycle is drained before the counters are returned.
    pub async fn run(mut self) -> Result<PipelineStats, PipelineError> {
        info!(
            "Starting pipeline (capture interval {:?}, handling timeout {:?}, max in flight {})",
            self.supervisor.deadline(),
            self.handler.timeout(),
            self.max_in_flight
        );

        let mut handlers: JoinSet<ClosedCycle> = JoinSet::new();
        let mut shutdown = self.shutdown.clone();
        let mut shutting_down = false;
        let mut next_cycle: u64 = 1;
        let mut capture = Some(self.launch(next_cycle));

        loop {
            if capture.is_none() && handlers.is_empty() {
                break;
            }

            tokio::select! {
                result = next_capture(&mut capture), if capture.is_some() => {
                    capture = None;
                    let done = match result {
                        Ok(Ok(done)) => done,
                        Ok(Err(e)) => return Err(self.fatal(e.into())),
                        Err(e) => {
                            return Err(self.fatal(CaptureError::TaskFailed(e.to_string()).into()))
                        }
                    };
                    self.stats.cycles_captured += 1;
                    debug!(
                        "[cycle {}] Capture {} ended {:?} after {}s",
                        done.cycle,
                        done.session_id,
                        done.outcome,
                        done.duration.num_seconds()
                    );

                    if !shutting_down {
                        self.wait_for_capacity(&mut handlers).await;
                        shutting_down = *self.shutdown.borrow();
                    }
                    if !shutting_down {
                        next_cycle += 1;
                        capture = Some(self.launch(next_cycle));
                    }
                    self.dispatch(&mut handlers, done);
                }
                joined = handlers.join_next(), if !handlers.is_empty() => {
                    if let Some(joined) = joined {
                        self.joined(joined);
                    }
                }
                _ = wait_for_shutdown(&mut shutdown), if !shutting_down => {
                    info!(
                        "Shutdown requested, draining {} open cycle(s): {:?}",
                        self.cycles.len(),
                        self.cycles
                    );
                    shutting_down = true;
                }
            }
        }

        info!("Pipeline stopped: {}", self.stats);
        Ok(self.stats)
    }

    fn launch(&mut self, cycle: u64) -> CaptureReceiver {
        self.cycles.insert(cycle, CycleState::Capturing);
        self.supervisor.launch(cycle)
    }

    fn dispatch(&mut self, handlers: &mut JoinSet<ClosedCycle>, done: CompletedCapture) {
        let cycle = done.cycle;
        self.cycles.insert(cycle, CycleState::Dispatched);
        let handler = self.handler.clone();
        let task = tokio::spawn(async move { handler.handle(cycle, done.trace_path).await });
        handlers.spawn(async move { (cycle, task.await) });
    }

    /// Blocks until fewer than `max_in_flight` cycles are open.
    async fn wait_for_capacity(&mut self, handlers: &mut JoinSet<ClosedCycle>) {
        while handlers.len() >= self.max_in_flight {
            warn!(
                "{} cycle(s) still open, pausing capture until one closes",
                handlers.len()
            );
            match handlers.join_next().await {
                Some(joined) => self.joined(joined),
                None => break,
            }
        }
    }

    fn joined(&mut self, joined: Result<ClosedCycle, JoinError>) {
        match joined {
            Ok(closed) => self.closed(closed),
            // The wrapper only awaits the handler, so this means it was aborted.
            Err(e) => error!("Cycle task lost before reporting: {}", e),
        }
    }

    fn closed(&mut self, (cycle, result): ClosedCycle) {
        let state = self.cycles.remove(&cycle);
        self.stats.cycles_closed += 1;
        match result {
            Ok(outcome) => self.record(&outcome),
            Err(e) => error!(
                "[cycle {}] Handler task failed while {:?}, trace left in place: {}",
                cycle, state, e
            ),
        }
        info!("[cycle {}] Pipeline: {}", cycle, self.stats);
    }

    fn record(&mut self, outcome: &CycleOutcome) {
        match &outcome.upload {
            Some(Ok(_)) => self.stats.uploads_completed += 1,
            Some(Err(e)) => {
                self.stats.uploads_failed += 1;
                report(outcome.cycle, e);
            }
            None => {}
        }
        match &outcome.stats {
            Some(Ok(summary)) => {
                for e in summary.failures() {
                    self.stats.stats_failures += 1;
                    report(outcome.cycle, e);
                }
            }
            Some(Err(e)) => {
                self.stats.stats_failures += 1;
                report(outcome.cycle, e);
            }
            None => {}
        }
        if outcome.timed_out {
            self.stats.timed_out += 1;
            report(
                outcome.cycle,
                &PipelineError::HandlingTimedOut {
                    cycle: outcome.cycle,
                    after: self.handler.timeout(),
                },
            );
        }
        if outcome.deleted {
            self.stats.artifacts_deleted += 1;
        }
    }

    fn fatal(&self, err: PipelineError) -> PipelineError {
        error!(
            "Fatal {:?} error, stopping pipeline with open cycles {:?}: {}",
            err.kind(),
            self.cycles,
            err
        );
        err
    }
}

async fn next_capture(
    capture: &mut Option<CaptureReceiver>,
) -> Result<Result<CompletedCapture, CaptureError>, oneshot::error::RecvError> {
    match capture {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

/// Logs a non-fatal cycle error at the level its policy asks for.
fn report<E: Classified + fmt::Display>(cycle: u64, err: &E) {
    match err.policy() {
        ErrorPolicy::LogAndContinue => warn!("[cycle {}] {}", cycle, err),
        ErrorPolicy::Escalate => error!("[cycle {}] ESCALATION: {}", cycle, err),
        ErrorPolicy::RetryWithBackoff | ErrorPolicy::Exit => {
            error!("[cycle {}] {:?} failure: {}", cycle, err.kind(), err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureTool;
    use crate::upload::memory_store::MemoryObjectStore;
    use std::path::Path;
    use std::time::Duration;

    const CAPTURE_SCRIPT: &str = "printf roadcrew-trace > \"$0\"; exec sleep 30";

    fn sh_tool(capture_script: &str) -> CaptureTool {
        CaptureTool::new(
            "sh",
            &["-c", capture_script, "{trace}"],
            &["-c", "echo $0", "{chisel}", "{trace}"],
        )
    }

    fn coordinator(
        tool: CaptureTool,
        dir: &Path,
        store: Arc<MemoryObjectStore>,
        interval: Duration,
        max_in_flight: usize,
    ) -> (Coordinator, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let supervisor = CaptureSupervisor::new(
            tool.clone(),
            dir.to_path_buf(),
            interval,
            Duration::from_secs(2),
            rx.clone(),
        );
        let uploader = ArtifactUploader::new(
            store,
            "testhost".to_string(),
            1,
            Backoff::new(Duration::from_millis(5)),
        );
        let handler = CycleHandler::new(
            Arc::new(uploader),
            Arc::new(StatsCollector::new(tool)),
            Duration::from_secs(10),
        );
        (
            Coordinator::from_parts(supervisor, handler, max_in_flight, rx),
            tx,
        )
    }

    fn shutdown_after(tx: watch::Sender<bool>, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(true);
        });
    }

    #[tokio::test]
    async fn cycles_are_uploaded_and_cleaned_until_shutdown() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let (coordinator, tx) = coordinator(
            sh_tool(CAPTURE_SCRIPT),
            dir.path(),
            store.clone(),
            Duration::from_millis(200),
            4,
        );

        shutdown_after(tx, Duration::from_millis(900));
        let stats = tokio::time::timeout(Duration::from_secs(20), coordinator.run())
            .await
            .expect("pipeline did not drain")
            .unwrap();

        assert!(stats.cycles_captured >= 2, "{}", stats);
        assert_eq!(stats.cycles_closed, stats.cycles_captured);
        assert_eq!(stats.uploads_completed, stats.cycles_captured);
        assert_eq!(stats.artifacts_deleted, stats.cycles_captured);
        assert_eq!(stats.uploads_failed, 0);
        assert_eq!(store.object_count() as u64, stats.cycles_captured);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_uploads_leave_artifacts_and_keep_capturing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::failing_puts());
        let (coordinator, tx) = coordinator(
            sh_tool(CAPTURE_SCRIPT),
            dir.path(),
            store,
            Duration::from_millis(150),
            4,
        );

        shutdown_after(tx, Duration::from_millis(700));
        let stats = coordinator.run().await.unwrap();

        assert!(stats.cycles_captured >= 2, "{}", stats);
        assert_eq!(stats.uploads_failed, stats.cycles_captured);
        assert_eq!(stats.artifacts_deleted, 0);
        assert_eq!(
            std::fs::read_dir(dir.path()).unwrap().count() as u64,
            stats.cycles_captured
        );
    }

    #[tokio::test]
    async fn capture_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _tx) = coordinator(
            sh_tool("exit 3"),
            dir.path(),
            Arc::new(MemoryObjectStore::new()),
            Duration::from_secs(5),
            4,
        );

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CaptureError(CaptureError::UnexpectedExit(_))
        ));
        assert_eq!(err.policy(), ErrorPolicy::Exit);
    }

    #[tokio::test]
    async fn capture_continues_while_uploads_are_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new().with_put_delay(Duration::from_millis(600)));
        let (coordinator, tx) = coordinator(
            sh_tool(CAPTURE_SCRIPT),
            dir.path(),
            store.clone(),
            Duration::from_millis(100),
            3,
        );

        shutdown_after(tx, Duration::from_millis(800));
        let stats = coordinator.run().await.unwrap();

        // Each upload outlasts several capture intervals.
        assert!(stats.cycles_captured >= 4, "{}", stats);
        assert!(store.max_concurrent_puts() >= 2);
        assert_eq!(stats.uploads_completed, stats.cycles_captured);
        assert_eq!(stats.artifacts_deleted, stats.cycles_captured);
    }

    #[tokio::test]
    async fn failed_stats_reports_are_counted_per_report() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CaptureTool::new(
            "sh",
            &["-c", CAPTURE_SCRIPT, "{trace}"],
            &["-c", "[ \"$0\" = topprocs_net ] && exit 4; echo $0", "{chisel}", "{trace}"],
        );
        let (coordinator, tx) = coordinator(
            tool,
            dir.path(),
            Arc::new(MemoryObjectStore::new()),
            Duration::from_millis(150),
            4,
        );

        shutdown_after(tx, Duration::from_millis(400));
        let stats = coordinator.run().await.unwrap();

        assert!(stats.cycles_captured >= 1, "{}", stats);
        assert_eq!(stats.stats_failures, stats.cycles_captured);
        assert_eq!(stats.artifacts_deleted, stats.cycles_captured);
    }

    #[tokio::test]
    async fn panicked_handler_still_closes_its_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, _tx) = coordinator(
            sh_tool(CAPTURE_SCRIPT),
            dir.path(),
            Arc::new(MemoryObjectStore::new()),
            Duration::from_secs(5),
            4,
        );
        coordinator.cycles.insert(5, CycleState::Dispatched);
        coordinator.cycles.insert(6, CycleState::Capturing);

        let err = tokio::spawn(async { panic!("handler panicked") })
            .await
            .unwrap_err();
        coordinator.closed((5, Err(err)));

        assert!(!coordinator.cycles.contains_key(&5));
        assert_eq!(coordinator.cycles.get(&6), Some(&CycleState::Capturing));
        assert_eq!(coordinator.stats.cycles_closed, 1);
        assert_eq!(coordinator.stats.uploads_completed, 0);
    }

    #[tokio::test]
    async fn open_cycle_bound_pauses_capture() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new().with_put_delay(Duration::from_millis(500)));
        let (coordinator, tx) = coordinator(
            sh_tool(CAPTURE_SCRIPT),
            dir.path(),
            store,
            Duration::from_millis(100),
            1,
        );

        shutdown_after(tx, Duration::from_millis(1000));
        let stats = coordinator.run().await.unwrap();

        // Unbounded, a 100ms cadence would capture around ten traces here.
        assert!(stats.cycles_captured >= 2, "{}", stats);
        assert!(stats.cycles_captured <= 4, "{}", stats);
        assert_eq!(stats.uploads_completed, stats.cycles_captured);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
