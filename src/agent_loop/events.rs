//! Turn event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FinishReason, Part, ToolState};

use super::types::TurnId;

/// Callback used for streaming turn events.
pub type TurnEventSink = Arc<dyn Fn(TurnEvent) + Send + Sync>;

/// Turn lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TurnLifecycle {
    Started,
    Completed { reason: FinishReason },
    Failed { error: String },
    Cancelled,
}

/// What kind of mutation is waiting for a decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    FileChange,
    CommandExecution,
}

/// Concrete event payloads emitted by the turn controller and runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEventPayload {
    Lifecycle {
        state: TurnLifecycle,
    },
    PartAdded {
        part: Part,
    },
    TextDelta {
        part_id: String,
        text: String,
    },
    ReasoningDelta {
        part_id: String,
        text: String,
    },
    ToolUpdated {
        part_id: String,
        call_id: String,
        tool: String,
        state: ToolState,
    },
    ApprovalRequired {
        call_id: String,
        pending_id: String,
        kind: ApprovalKind,
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    Retry {
        attempt: u32,
        delay_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        error: String,
    },
    Warning {
        message: String,
    },
}

/// Envelope for streaming turn events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnEvent {
    pub turn_id: TurnId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: TurnEventPayload,
}

/// Stamps payloads with the turn id and a gap-free sequence number.
#[derive(Clone)]
pub(crate) struct TurnEventEmitter {
    turn_id: TurnId,
    seq: Arc<AtomicU64>,
    sink: Option<TurnEventSink>,
}

impl TurnEventEmitter {
    pub(crate) fn new(turn_id: TurnId, sink: Option<TurnEventSink>) -> Self {
        Self {
            turn_id,
            seq: Arc::new(AtomicU64::new(1)),
            sink,
        }
    }

    pub(crate) fn emit(&self, payload: TurnEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(TurnEvent {
            turn_id: self.turn_id,
            seq,
            timestamp: Utc::now(),
            payload,
        });
    }
}
