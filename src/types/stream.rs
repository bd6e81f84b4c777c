//! Streaming types delivered by a turn transport.

use serde::{Deserialize, Serialize};

use super::finish::FinishReason;
use super::usage::Usage;

/// A delta emitted during streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStreamDelta {
    /// The incremental text chunk (the message for `Error`).
    pub text: String,
    /// Event type.
    pub event_type: StreamEventType,
    /// Finish reason (only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Usage (on step-finish and final deltas).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Type of stream event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// Stream started.
    Start,
    /// Incremental text content.
    TextDelta,
    /// Incremental reasoning content.
    ReasoningDelta,
    /// A model step ended; carries usage.
    StepFinish,
    /// Stream finished.
    Done,
    /// Error during stream.
    Error,
}

impl TextStreamDelta {
    fn of(event_type: StreamEventType, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            event_type,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn start() -> Self {
        Self::of(StreamEventType::Start, "")
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::of(StreamEventType::TextDelta, text)
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::of(StreamEventType::ReasoningDelta, text)
    }

    pub fn step_finish(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::of(StreamEventType::StepFinish, "")
        }
    }

    pub fn done(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::of(StreamEventType::Done, "")
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::of(StreamEventType::Error, message)
    }
}
