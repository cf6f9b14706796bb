use std::path::Path;

use log::{debug, info, warn};

use crate::capture::CaptureTool;
use crate::error_handling::types::StatsError;

/// Report listing the processes that used the most CPU.
pub const CPU_CHISEL: &str = "topprocs_cpu";
/// Report listing the processes that moved the most network bytes.
pub const NET_CHISEL: &str = "topprocs_net";

/// Output of one stats pass. Each report succeeds or fails on its own.
#[derive(Debug)]
pub struct StatsReport {
    pub cpu: Result<String, StatsError>,
    pub net: Result<String, StatsError>,
}

impl StatsReport {
    pub fn failures(&self) -> impl Iterator<Item = &StatsError> {
        [&self.cpu, &self.net]
            .into_iter()
            .filter_map(|r| r.as_ref().err())
    }

    pub fn is_complete(&self) -> bool {
        self.cpu.is_ok() && self.net.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct StatsCollector {
    tool: CaptureTool,
}

impl StatsCollector {
    pub fn new(tool: CaptureTool) -> Self {
        Self { tool }
    }

    /// Runs the CPU report, then the network report, over `trace` and logs
    /// their output.
    ///
    /// Only reads the file. A failing CPU report does not stop the network one.
    pub async fn summarize(&self, cycle: u64, trace: &Path) -> StatsReport {
        debug!("[cycle {}] Starting stats pass over {}", cycle, trace.display());
        let cpu = self.report(cycle, CPU_CHISEL, trace).await;
        let net = self.report(cycle, NET_CHISEL, trace).await;
        StatsReport { cpu, net }
    }

    async fn report(&self, cycle: u64, chisel: &str, trace: &Path) -> Result<String, StatsError> {
        let output = self
            .tool
            .report_command(chisel, trace)
            .output()
            .await
            .map_err(|source| {
                warn!("[cycle {}] Could not run {} report: {}", cycle, chisel, source);
                StatsError::SpawnFailed {
                    chisel: chisel.to_string(),
                    source,
                }
            })?;

        if !output.status.success() {
            return Err(StatsError::ReportFailed {
                chisel: chisel.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        info!("[cycle {}] {} for {}:\n{}", cycle, chisel, trace.display(), text.trim_end());
        Ok(text)
    }
}
