//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Overloaded,
    Timeout,
    Transport,
    Configuration,
    Serialization,
    Io,
    ToolExecution,
    ApprovalScope,
    PathEscape,
    Usage,
    Cancelled,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    IncreaseTimeout,
    CheckConfiguration,
    /// Resend the resolution request with the session and workspace that created the entry.
    CheckScope,
    KeepInsideWorkspace,
    /// Record on the tool part and let the model react.
    ReportToModel,
    ReportUpstream,
}
