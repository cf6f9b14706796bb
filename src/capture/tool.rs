//! Invocation templates for the external trace-capture tool.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Replaced by the trace file path in argument templates.
pub const TRACE_PLACEHOLDER: &str = "{trace}";
/// Replaced by the report kind (chisel name) in argument templates.
pub const CHISEL_PLACEHOLDER: &str = "{chisel}";

/// How to run the capture tool in its two modes.
///
/// - write mode: quiet, records a binary trace into `{trace}` until interrupted.
/// - report mode: quiet, runs the `{chisel}` report over a finished `{trace}` and
///   prints human-readable text on stdout.
///
/// The defaults target `sysdig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureTool {
    pub program: String,
    pub write_args: Vec<String>,
    pub report_args: Vec<String>,
}

impl Default for CaptureTool {
    fn default() -> Self {
        Self {
            program: "sysdig".to_string(),
            write_args: vec!["-qw".to_string(), TRACE_PLACEHOLDER.to_string()],
            report_args: vec![
                "-q".to_string(),
                "-c".to_string(),
                CHISEL_PLACEHOLDER.to_string(),
                "-r".to_string(),
                TRACE_PLACEHOLDER.to_string(),
            ],
        }
    }
}

impl CaptureTool {
    pub fn new<S: Into<String>>(program: S, write_args: &[&str], report_args: &[&str]) -> Self {
        Self {
            program: program.into(),
            write_args: write_args.iter().map(|s| s.to_string()).collect(),
            report_args: report_args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Command that records a trace into `trace`. Stdout is discarded, stderr piped.
    ///
    /// The child gets its own process group so a terminal Ctrl-C reaches only
    /// roadcrew, which then stops the capture itself.
    pub fn write_command(&self, trace: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(expand(&self.write_args, trace, ""))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0);
        cmd
    }

    /// Command that prints the `chisel` report for a finished `trace`.
    ///
    /// The child is killed if the command future is dropped, so an abandoned
    /// stats pass never keeps reading a trace file.
    pub fn report_command(&self, chisel: &str, trace: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(expand(&self.report_args, trace, chisel))
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }
}

fn expand(template: &[String], trace: &Path, chisel: &str) -> Vec<String> {
    let trace = trace.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace(TRACE_PLACEHOLDER, &trace)
                .replace(CHISEL_PLACEHOLDER, chisel)
        })
        .collect()
}
