//! Execution status and exit status types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The lifecycle status of a job execution or step execution.
///
/// Running statuses progress `Starting -> Started`, optionally through
/// `Stopping` when a stop was requested, and end in exactly one terminal
/// status. `Processed` is a post-processing terminal state reachable only
/// from `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Metadata has been created but the worker has not picked up the run.
    Starting,
    /// The pipeline runtime is driving the step list.
    Started,
    /// A stop was requested; the runtime will halt at the next step boundary.
    Stopping,
    /// All steps finished successfully.
    Completed,
    /// A step body reported a failure.
    Failed,
    /// The run halted cooperatively after a stop request.
    Stopped,
    /// The run was orphaned (crash recovery) or never reached by the runtime.
    Abandoned,
    /// Downstream post-processing acknowledged a completed run.
    Processed,
}

impl BatchStatus {
    /// Returns true while the execution can still make progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    /// Returns true once the execution has reached a final status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stopped | Self::Abandoned | Self::Processed
        )
    }

    /// Returns true if a persisted `self` may be overwritten with `next`.
    ///
    /// Terminal statuses are immutable apart from `Completed -> Processed`.
    /// A persisted `Stopping` never moves back to `Starting`/`Started`; the
    /// stop signal would otherwise be lost to a late runtime write.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return *self == Self::Completed && next == Self::Processed;
        }
        if *self == Self::Stopping {
            return !matches!(next, Self::Starting | Self::Started);
        }
        true
    }

    /// The stable string form used in persisted rows and event payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
            Self::Abandoned => "ABANDONED",
            Self::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(Self::Starting),
            "STARTED" => Ok(Self::Started),
            "STOPPING" => Ok(Self::Stopping),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            "ABANDONED" => Ok(Self::Abandoned),
            "PROCESSED" => Ok(Self::Processed),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

/// Coarse outcome classification recorded alongside the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitCode {
    /// No outcome recorded yet.
    Unknown,
    /// The body is still running.
    Executing,
    /// Finished successfully.
    Completed,
    /// Finished with a failure.
    Failed,
    /// Halted after a stop request.
    Stopped,
    /// Never ran to completion.
    Abandoned,
}

impl ExitCode {
    /// The stable string form used in persisted rows and event payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
            Self::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNKNOWN" => Ok(Self::Unknown),
            "EXECUTING" => Ok(Self::Executing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            "ABANDONED" => Ok(Self::Abandoned),
            other => Err(format!("unknown exit code: {other}")),
        }
    }
}

/// Exit code plus a free-text description of the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// The coarse outcome.
    pub exit_code: ExitCode,
    /// Human-readable detail, e.g. the first failure message.
    pub exit_description: String,
}

impl ExitStatus {
    /// An exit status with no recorded outcome.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            exit_code: ExitCode::Unknown,
            exit_description: String::new(),
        }
    }

    /// A successful exit status.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            exit_code: ExitCode::Completed,
            exit_description: String::new(),
        }
    }

    /// A failed exit status carrying the failure message.
    #[must_use]
    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            exit_code: ExitCode::Failed,
            exit_description: description.into(),
        }
    }

    /// A stopped exit status.
    #[must_use]
    pub fn stopped() -> Self {
        Self {
            exit_code: ExitCode::Stopped,
            exit_description: String::new(),
        }
    }

    /// An abandoned exit status.
    #[must_use]
    pub fn abandoned() -> Self {
        Self {
            exit_code: ExitCode::Abandoned,
            exit_description: String::new(),
        }
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}
