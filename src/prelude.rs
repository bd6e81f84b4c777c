//! Convenience re-exports for common use.

pub use crate::agent_loop::{
    ChannelTransport, NextAction, TurnController, TurnEvent, TurnEventPayload, TurnHandle,
    TurnOutcome, TurnReport, TurnRequest, TurnRunner, TurnState, TurnTransport,
};
pub use crate::config::EngineConfig;
pub use crate::dispatch::ToolDispatchGate;
pub use crate::error::{Result, RikkiError};
pub use crate::extract::{ExtractEvent, TagExtractor};
pub use crate::pending::{Decision, DecisionMode, PendingRegistry, ResolutionRequest};
pub use crate::risk::{RiskAssessor, RiskCategory};
pub use crate::tools::{AgentTool, AgentToolParameters, Tool, ToolArguments, ToolRegistry};
pub use crate::types::{FinishReason, Part, PartKind, StreamEventType, TextStreamDelta, Usage};
