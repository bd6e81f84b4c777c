//! Terminal reasons reported by the transport.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Why the model stopped emitting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    #[serde(alias = "tool-calls", alias = "tool_use")]
    #[strum(to_string = "tool_calls", serialize = "tool-calls", serialize = "tool_use")]
    ToolCalls,
    ContentFilter,
    Error,
    Cancelled,
    Unknown,
}

impl FinishReason {
    /// Parse a provider-specific reason; anything unrecognized is `Unknown`.
    pub fn normalize(raw: &str) -> Self {
        raw.trim()
            .to_ascii_lowercase()
            .parse()
            .unwrap_or(FinishReason::Unknown)
    }

    /// Whether the agent loop should run another turn after this one.
    pub fn continues_loop(&self) -> bool {
        matches!(self, FinishReason::ToolCalls | FinishReason::Unknown)
    }
}
