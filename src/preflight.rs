//! Startup checks
//!
//! Verifies the host can actually run the pipeline before the first capture
//! starts: the capture tool runs, the temp directory is writable, we are
//! root, and the bucket answers. Any failure is an environment error.

#![allow(unsafe_code)] // geteuid() requires unsafe

use std::path::Path;
use std::process::Stdio;

use log::{debug, info};
use tokio::process::Command;

use crate::configuration::PipelineConfig;
use crate::error_handling::types::PreflightError;
use crate::upload::ObjectStore;

pub async fn run_preflight_checks(
    config: &PipelineConfig,
    store: &dyn ObjectStore,
) -> Result<(), PreflightError> {
    check_capture_tool(&config.capture.program).await?;
    check_tmp_dir(&config.tmp_dir)?;
    check_privileges()?;
    check_store(store).await?;
    info!("Preflight checks passed");
    Ok(())
}

/// The tool only has to start; not every program accepts `--version`.
pub async fn check_capture_tool(program: &str) -> Result<(), PreflightError> {
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PreflightError::ToolNotFound(format!("{}: {}", program, e)))?;

    debug!(
        "{} --version: {} {}",
        program,
        output.status,
        String::from_utf8_lossy(&output.stdout).trim()
    );
    Ok(())
}

pub fn check_tmp_dir(dir: &Path) -> Result<(), PreflightError> {
    if !dir.is_dir() {
        return Err(PreflightError::TmpDirUnusable(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    // The probe file is removed when dropped.
    tempfile::tempfile_in(dir)
        .map(|_| ())
        .map_err(|e| PreflightError::TmpDirUnusable(format!("{}: {}", dir.display(), e)))
}

pub fn check_privileges() -> Result<(), PreflightError> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }
    Err(PreflightError::InsufficientPrivileges)
}

pub async fn check_store(store: &dyn ObjectStore) -> Result<(), PreflightError> {
    store.probe().await.map_err(PreflightError::StoreUnreachable)
}
