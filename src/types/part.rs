//! Typed fragments of an assistant turn.

use serde::{Deserialize, Serialize};

use super::finish::FinishReason;
use super::usage::Usage;
use crate::error::{Result, RikkiError};
use crate::util::id;

/// Message shown on tool calls cut short by a transport failure.
pub const INTERRUPTED: &str = "interrupted";
/// Message shown on tool calls cut short by cancellation.
pub const CANCELLED: &str = "cancelled";

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One ordered fragment of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    #[serde(flatten)]
    pub kind: PartKind,
}

/// Variant payload, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartKind {
    Text(TextPart),
    Reasoning(TextPart),
    Tool(ToolPart),
    StepStart(StepStartPart),
    StepFinish(StepFinishPart),
}

impl Part {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        kind: PartKind,
    ) -> Self {
        Self {
            id: id::ascending("prt"),
            session_id: session_id.into(),
            message_id: message_id.into(),
            kind,
        }
    }

    /// Discriminator as serialized.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            PartKind::Text(_) => "text",
            PartKind::Reasoning(_) => "reasoning",
            PartKind::Tool(_) => "tool",
            PartKind::StepStart(_) => "step-start",
            PartKind::StepFinish(_) => "step-finish",
        }
    }

    pub fn as_text(&self) -> Option<&TextPart> {
        match &self.kind {
            PartKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_reasoning(&self) -> Option<&TextPart> {
        match &self.kind {
            PartKind::Reasoning(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolPart> {
        match &self.kind {
            PartKind::Tool(tool) => Some(tool),
            _ => None,
        }
    }

    pub fn as_tool_mut(&mut self) -> Option<&mut ToolPart> {
        match &mut self.kind {
            PartKind::Tool(tool) => Some(tool),
            _ => None,
        }
    }

    /// Streaming text or reasoning body, if this part has one.
    pub fn text_mut(&mut self) -> Option<&mut TextPart> {
        match &mut self.kind {
            PartKind::Text(text) | PartKind::Reasoning(text) => Some(text),
            _ => None,
        }
    }
}

/// Start and end of a streamed part, epoch millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartTime {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Text or reasoning content that grows while open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
    pub time: PartTime,
}

impl TextPart {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            time: PartTime {
                start: now_millis(),
                end: None,
            },
        }
    }

    pub fn is_open(&self) -> bool {
        self.time.end.is_none()
    }

    /// Trim and stamp the end time.
    pub fn close(&mut self) {
        if self.is_open() {
            let trimmed = self.text.trim();
            if trimmed.len() != self.text.len() {
                self.text = trimmed.to_string();
            }
            self.time.end = Some(now_millis());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStartPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFinishPart {
    pub reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool parts
// ---------------------------------------------------------------------------

/// Lifecycle of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Error)
    }

    /// `pending → running → (completed | error)`; `pending → error` covers calls that never ran.
    pub fn can_transition_to(&self, next: ToolStatus) -> bool {
        matches!(
            (self, next),
            (ToolStatus::Pending, ToolStatus::Running)
                | (ToolStatus::Pending, ToolStatus::Error)
                | (ToolStatus::Running, ToolStatus::Completed)
                | (ToolStatus::Running, ToolStatus::Error)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolState {
    pub status: ToolStatus,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

/// Successful result of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCompletion {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolCompletion {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPart {
    pub tool: String,
    pub call_id: String,
    pub state: ToolState,
}

impl ToolPart {
    pub fn new(tool: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            call_id: id::ascending("call"),
            state: ToolState {
                status: ToolStatus::Pending,
                input,
                output: None,
                title: None,
                error: None,
                metadata: serde_json::Map::new(),
                start_time: None,
                end_time: None,
            },
        }
    }

    pub fn status(&self) -> ToolStatus {
        self.state.status
    }

    fn transition(&mut self, next: ToolStatus) -> Result<()> {
        if !self.state.status.can_transition_to(next) {
            return Err(RikkiError::InvalidState(format!(
                "tool call {} cannot move from {:?} to {:?}",
                self.call_id, self.state.status, next
            )));
        }
        self.state.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(ToolStatus::Running)?;
        self.state.start_time = Some(now_millis());
        Ok(())
    }

    pub fn complete(&mut self, completion: ToolCompletion) -> Result<()> {
        self.transition(ToolStatus::Completed)?;
        self.state.output = Some(completion.output);
        self.state.title = completion.title;
        self.state.metadata.extend(completion.metadata);
        self.state.end_time = Some(now_millis());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(ToolStatus::Error)?;
        self.state.error = Some(error.into());
        self.state.end_time = Some(now_millis());
        Ok(())
    }
}
