//! Approval resolution protocol between a front end and the registry.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::shell::ShellOutput;

use super::PendingEntry;

/// Human decision on a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Final status reported for a resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResolutionStatus {
    Applied,
    Rejected,
    Error,
}

/// Successful resolution of one entry.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub status: ResolutionStatus,
    pub entry: PendingEntry,
    /// Set when an approved command ran.
    pub output: Option<ShellOutput>,
}

/// Request to approve or reject a pending entry.
///
/// Either an entry id or a `(session_id, workspace_root, path)` scope identifies the entry.
/// `session_id` is always required and must match the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct ResolutionRequest {
    #[builder(into)]
    pub session_id: Option<String>,
    #[builder(into)]
    pub workspace_root: Option<String>,
    #[builder(into)]
    pub path: Option<String>,
    #[builder(into)]
    pub change_id: Option<String>,
    #[builder(into)]
    pub command_id: Option<String>,
    #[builder(default)]
    pub reject: bool,
    #[builder(into)]
    pub decision_mode: Option<String>,
}

/// Tagged result the transport maps onto its own status codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    pub status: ResolutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ResolutionResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResolutionStatus::Error,
            error: Some(message.into()),
            id: None,
            output: None,
            exit_code: None,
        }
    }

    pub(crate) fn from_resolved(resolved: &Resolved, preview_bytes: usize) -> Self {
        Self {
            status: resolved.status,
            error: None,
            id: Some(resolved.entry.id().to_string()),
            output: resolved
                .output
                .as_ref()
                .map(|o| crate::util::text::preview(&o.combined(), preview_bytes)),
            exit_code: resolved.output.as_ref().and_then(|o| o.exit_code),
        }
    }
}
