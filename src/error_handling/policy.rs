use std::time::Duration;

/// Failure taxonomy shared by every stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Broken host environment: missing capture tool, unusable temp dir, no privileges.
    Environment,
    /// The capture process could not be started, signaled or reaped.
    Launch,
    /// Opening, reading or transferring an artifact to the object store failed.
    Transfer,
    /// A statistics pass failed. Carries no durability obligation.
    Diagnostic,
    /// A dispatched cycle did not close within its handling budget.
    Timeout,
}

/// What the pipeline does when an error of a given kind surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Terminate the process with a diagnostic.
    Exit,
    /// Retry the operation with exponential backoff, escalate once attempts run out.
    RetryWithBackoff,
    /// Log a warning and keep going.
    LogAndContinue,
    /// Log at error level for paging, keep capturing.
    Escalate,
}

/// Errors that can be mapped onto the [`ErrorKind`] taxonomy.
pub trait Classified {
    fn kind(&self) -> ErrorKind;

    fn policy(&self) -> ErrorPolicy {
        policy_for(self.kind())
    }
}

/// The policy table. Only environment and launch failures are process-fatal.
pub fn policy_for(kind: ErrorKind) -> ErrorPolicy {
    match kind {
        ErrorKind::Environment | ErrorKind::Launch => ErrorPolicy::Exit,
        ErrorKind::Transfer => ErrorPolicy::RetryWithBackoff,
        ErrorKind::Diagnostic => ErrorPolicy::LogAndContinue,
        ErrorKind::Timeout => ErrorPolicy::Escalate,
    }
}

/// Exponential backoff schedule: `base`, `2 * base`, `4 * base`, ... capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub const DEFAULT_MAX: Duration = Duration::from_secs(30);

    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max: Self::DEFAULT_MAX,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
