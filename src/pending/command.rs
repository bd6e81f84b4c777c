//! Proposed shell commands and per-session approval policy.

use std::collections::BTreeSet;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::risk::{self, RiskCategory};
use crate::util::id;
use crate::workspace;

/// A shell command awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct PendingCommand {
    #[builder(default = id::pending())]
    pub id: String,
    #[builder(into)]
    pub command: String,
    #[builder(into, default)]
    pub description: String,
    #[builder(into)]
    pub cwd: String,
    #[builder(into)]
    pub shell: String,
    #[builder(into)]
    pub workspace_root: String,
    #[builder(into)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[builder(default = 60_000)]
    pub timeout_ms: u64,
    #[builder(default = String::from("high"))]
    pub risk_level: String,
    #[serde(default)]
    #[builder(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    #[builder(into, default)]
    pub command_family: String,
    #[builder(default = RiskCategory::Restricted)]
    pub risk_category: RiskCategory,
    #[serde(default)]
    #[builder(default)]
    pub strict_approval: bool,
    /// Epoch millis.
    #[builder(default = chrono::Utc::now().timestamp_millis())]
    pub created_at: i64,
}

impl PendingCommand {
    /// Fill in the command family and force strict approval for destructive or
    /// boundary-crossing categories.
    pub(crate) fn normalized(mut self) -> Self {
        self.command_family = if self.command_family.trim().is_empty() {
            risk::extract_command_family(&self.command)
        } else {
            risk::normalize_command_family(&self.command_family)
        };
        if matches!(
            self.risk_category,
            RiskCategory::Destructive | RiskCategory::WorkspaceBoundary
        ) {
            self.strict_approval = true;
        }
        self
    }

    pub(crate) fn same_scope(&self, other: &PendingCommand) -> bool {
        self.session_id.trim() == other.session_id.trim()
            && workspace::scope_key(&self.workspace_root)
                == workspace::scope_key(&other.workspace_root)
            && self.command.trim() == other.command.trim()
    }

    /// Copy everything but identity from a newer proposal of the same command.
    pub(crate) fn absorb(&mut self, incoming: PendingCommand) {
        let id = std::mem::take(&mut self.id);
        let created_at = self.created_at;
        *self = incoming;
        self.id = id;
        self.created_at = created_at;
    }
}

/// How a human approved a command, and what it implies for later ones.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DecisionMode {
    /// Approve this command only.
    #[default]
    Manual,
    /// Also auto-approve later non-strict commands of the same family.
    Whitelist,
    /// Auto-approve every later non-strict command in the session.
    AlwaysAllowNonDestructive,
}

impl DecisionMode {
    /// Unknown or missing modes mean `manual`.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        raw.map(str::trim)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

/// Auto-approval state accumulated for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub always_allow_non_destructive: bool,
    pub whitelist: BTreeSet<String>,
}

impl SessionPolicy {
    pub fn allows(&self, command_family: &str, strict: bool) -> bool {
        if strict {
            return false;
        }
        if self.always_allow_non_destructive {
            return true;
        }
        let family = risk::normalize_command_family(command_family);
        !family.is_empty() && self.whitelist.contains(&family)
    }

    pub(crate) fn record(&mut self, command: &PendingCommand, mode: DecisionMode) {
        if command.strict_approval {
            return;
        }
        match mode {
            DecisionMode::Manual => {}
            DecisionMode::AlwaysAllowNonDestructive => self.always_allow_non_destructive = true,
            DecisionMode::Whitelist => {
                let family = if command.command_family.is_empty() {
                    risk::extract_command_family(&command.command)
                } else {
                    risk::normalize_command_family(&command.command_family)
                };
                if !family.is_empty() {
                    self.whitelist.insert(family);
                }
            }
        }
    }
}
