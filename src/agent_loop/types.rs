//! Core turn types for the agent loop.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{FinishReason, Part, Usage};

/// Unique turn identifier.
pub type TurnId = Uuid;

/// Turn lifecycle state.
///
/// `Idle → Streaming → Finalizing → Done`, or `Errored`/`Cancelled` from any live state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Streaming,
    Finalizing,
    Done,
    Errored,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done | TurnState::Errored | TurnState::Cancelled)
    }
}

/// What the caller should do after a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Run another turn with the tool results.
    Continue,
    /// Hand control back to the user.
    Stop,
    /// Compact the context before continuing.
    Compact,
}

/// Result of a finished turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub state: TurnState,
    pub reason: FinishReason,
    pub next: NextAction,
    /// At least one tool call queued a change or command for approval.
    pub awaiting_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

/// One assistant turn, handed to the transcript store once finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub id: TurnId,
    pub session_id: String,
    pub message_id: String,
    pub workspace_root: String,
    pub state: TurnState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishReason>,
    #[serde(default)]
    pub usage: Usage,
    pub parts: Vec<Part>,
}
