use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use super::policy::{Classified, ErrorKind};

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingValue(String),
    NotInRange(String),
    DirectoryDoesNotExist(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing configuration value: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl Classified for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Environment
    }
}

#[derive(Debug)]
pub enum PreflightError {
    ToolNotFound(String),
    TmpDirUnusable(String),
    InsufficientPrivileges,
    HostnameUnavailable(std::io::Error),
    StoreUnreachable(StoreError),
}

impl fmt::Display for PreflightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightError::ToolNotFound(e) => write!(f, "Capture tool not found: {}", e),
            PreflightError::TmpDirUnusable(e) => write!(f, "Temporary directory unusable: {}", e),
            PreflightError::InsufficientPrivileges => {
                write!(f, "Insufficient privileges: capture must run as root")
            }
            PreflightError::HostnameUnavailable(e) => {
                write!(f, "Unable to resolve local hostname: {}", e)
            }
            PreflightError::StoreUnreachable(e) => write!(f, "Object store unreachable: {}", e),
        }
    }
}

impl std::error::Error for PreflightError {}

impl Classified for PreflightError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Environment
    }
}

#[derive(Debug)]
pub enum CaptureError {
    TempFileFailed(std::io::Error),
    SpawnFailed(std::io::Error),
    SignalFailed(std::io::Error),
    WaitFailed(std::io::Error),
    UnexpectedExit(ExitStatus),
    TaskFailed(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::TempFileFailed(e) => write!(f, "Trace file creation failed: {}", e),
            CaptureError::SpawnFailed(e) => write!(f, "Capture process start failed: {}", e),
            CaptureError::SignalFailed(e) => write!(f, "Capture process signal failed: {}", e),
            CaptureError::WaitFailed(e) => write!(f, "Capture process wait failed: {}", e),
            CaptureError::UnexpectedExit(status) => {
                write!(f, "Capture process exited unexpectedly: {}", status)
            }
            CaptureError::TaskFailed(e) => write!(f, "Capture task failed: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl Classified for CaptureError {
    fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::TempFileFailed(_) => ErrorKind::Environment,
            _ => ErrorKind::Launch,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    RequestFailed(String),
    MissingUploadId(String),
    MissingETag(i32),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::RequestFailed(e) => write!(f, "Storage request failed: {}", e),
            StoreError::MissingUploadId(key) => {
                write!(f, "Storage returned no multipart upload id for {}", key)
            }
            StoreError::MissingETag(part) => {
                write!(f, "Storage returned no ETag for part {}", part)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl Classified for StoreError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Transfer
    }
}

#[derive(Debug)]
pub enum UploadError {
    IoError(std::io::Error),
    SizeMismatch { expected: u64, actual: u64 },
    StoreError(StoreError),
    Exhausted { attempts: u32, last: Box<UploadError> },
    TaskFailed(String),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::IoError(e) => write!(f, "Upload IO error: {}", e),
            UploadError::SizeMismatch { expected, actual } => write!(
                f,
                "Trace file changed during upload: expected {} bytes, read {}",
                expected, actual
            ),
            UploadError::StoreError(e) => write!(f, "Upload storage error: {}", e),
            UploadError::Exhausted { attempts, last } => {
                write!(f, "Upload failed after {} attempt(s): {}", attempts, last)
            }
            UploadError::TaskFailed(e) => write!(f, "Upload task failed: {}", e),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::IoError(err)
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        UploadError::StoreError(err)
    }
}

impl Classified for UploadError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Transfer
    }
}

#[derive(Debug)]
pub enum StatsError {
    SpawnFailed {
        chisel: String,
        source: std::io::Error,
    },
    ReportFailed {
        chisel: String,
        status: ExitStatus,
        stderr: String,
    },
    TaskFailed(String),
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::SpawnFailed { chisel, source } => {
                write!(f, "Stats pass {} could not start: {}", chisel, source)
            }
            StatsError::ReportFailed {
                chisel,
                status,
                stderr,
            } => write!(f, "Stats pass {} failed ({}): {}", chisel, status, stderr.trim()),
            StatsError::TaskFailed(e) => write!(f, "Stats task failed: {}", e),
        }
    }
}

impl std::error::Error for StatsError {}

impl Classified for StatsError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Diagnostic
    }
}

#[derive(Debug)]
pub enum PipelineError {
    ConfigurationError(ConfigError),
    PreflightError(PreflightError),
    CaptureError(CaptureError),
    HandlingTimedOut { cycle: u64, after: Duration },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            PipelineError::PreflightError(e) => write!(f, "Preflight error: {}", e),
            PipelineError::CaptureError(e) => write!(f, "Capture error: {}", e),
            PipelineError::HandlingTimedOut { cycle, after } => write!(
                f,
                "Cycle {} was not closed within {:?}",
                cycle, after
            ),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::ConfigurationError(err)
    }
}

impl From<PreflightError> for PipelineError {
    fn from(err: PreflightError) -> Self {
        PipelineError::PreflightError(err)
    }
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        PipelineError::CaptureError(err)
    }
}

impl Classified for PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ConfigurationError(e) => e.kind(),
            PipelineError::PreflightError(e) => e.kind(),
            PipelineError::CaptureError(e) => e.kind(),
            PipelineError::HandlingTimedOut { .. } => ErrorKind::Timeout,
        }
    }
}
