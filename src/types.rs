//! Transfer data model shared by the runner, installer and orchestrator.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Which download agent performs an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// MEGAcmd, backed by its background server
    Primary,
    /// megatools, stateless last resort
    Fallback,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "MEGAcmd"),
            Self::Fallback => write!(f, "megatools"),
        }
    }
}

/// One link to fetch into one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    source_link: String,
    destination_path: PathBuf,
}

impl TransferRequest {
    pub fn new(source_link: impl Into<String>, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            source_link: source_link.into(),
            destination_path: destination_path.into(),
        }
    }

    pub fn source_link(&self) -> &str {
        &self.source_link
    }

    pub fn destination_path(&self) -> &Path {
        &self.destination_path
    }

    /// A blank link cannot be transferred
    pub fn has_link(&self) -> bool {
        !self.source_link.trim().is_empty()
    }
}

/// Result of a single agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptResult {
    /// Agent exit code, passed through unchanged
    pub exit_code: i32,
    pub tool_used: Tool,
}

impl AttemptResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Why a transfer ended without success
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MissingLink,
    DestinationUnavailable(String),
    Exhausted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLink => write!(f, "missing link"),
            Self::DestinationUnavailable(msg) => {
                write!(f, "destination unavailable: {}", msg)
            }
            Self::Exhausted => write!(f, "all methods exhausted"),
        }
    }
}

/// Terminal value of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Success(Tool),
    Failure(FailureReason),
}

impl RecoveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(tool) => write!(f, "downloaded with {}", tool),
            Self::Failure(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Outcome together with the attempts that led to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub outcome: RecoveryOutcome,
    pub attempts: Vec<AttemptResult>,
}
