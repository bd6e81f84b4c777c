//! Error types for the turn engine.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum RikkiError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Provider is overloaded: {0}")]
    Overloaded(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("{0}")]
    ApprovalScope(String),

    #[error("Target path escapes workspace root: {path} (root: {root})")]
    PathEscape { path: String, root: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Cancelled")]
    Cancelled,
}

impl RikkiError {
    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a transport error from any upstream message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Overloaded(_) => ErrorCategory::Overloaded,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Transport(message) => match crate::util::retry::classify_message(message) {
                Some(reason) => reason.category(),
                None => ErrorCategory::Transport,
            },
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Io,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::ApprovalScope(_) => ErrorCategory::ApprovalScope,
            Self::PathEscape { .. } => ErrorCategory::PathEscape,
            Self::InvalidArgument(_) | Self::InvalidState(_) => ErrorCategory::Usage,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Overloaded | ErrorCategory::Timeout
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::RateLimit | ErrorCategory::Overloaded => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ApprovalScope => RecoverySuggestion::CheckScope,
            ErrorCategory::PathEscape => RecoverySuggestion::KeepInsideWorkspace,
            ErrorCategory::ToolExecution => RecoverySuggestion::ReportToModel,
            _ => RecoverySuggestion::ReportUpstream,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RikkiError>;
