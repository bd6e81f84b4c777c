//! Proposed file mutations.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::util::id;
use crate::workspace;

/// Kind of file mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ChangeType {
    Create,
    Edit,
    Delete,
}

impl ChangeType {
    /// Type of an entry after `incoming` is merged onto `existing`.
    ///
    /// Re-creating a file queued for deletion is an edit of the original, and editing a
    /// file that does not exist yet is still its creation.
    pub fn merge(existing: ChangeType, incoming: ChangeType) -> ChangeType {
        match (existing, incoming) {
            (ChangeType::Delete, ChangeType::Create) => ChangeType::Edit,
            (ChangeType::Create, ChangeType::Edit) => ChangeType::Create,
            (_, incoming) => incoming,
        }
    }
}

/// A file mutation awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: String,
    /// Relative to `workspace_root`, slash-separated.
    pub path: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub old_content: Option<String>,
    #[serde(default)]
    pub new_content: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    /// Epoch millis.
    pub created_at: i64,
    /// As originally supplied, not normalized.
    pub workspace_root: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl PendingChange {
    pub fn new(
        path: impl Into<String>,
        change_type: ChangeType,
        old_content: Option<String>,
        new_content: Option<String>,
        workspace_root: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let preview = summarize(change_type, old_content.as_deref(), new_content.as_deref());
        Self {
            id: id::pending(),
            path: path.into(),
            change_type,
            old_content,
            new_content,
            preview: Some(preview),
            created_at: chrono::Utc::now().timestamp_millis(),
            workspace_root: workspace_root.into(),
            session_id: session_id.into(),
            message_id: None,
            call_id: None,
        }
    }

    /// Record which message and tool call proposed this change.
    pub fn with_origin(mut self, message_id: Option<String>, call_id: Option<String>) -> Self {
        self.message_id = message_id;
        self.call_id = call_id;
        self
    }

    pub(crate) fn scope(&self) -> ScopeKey {
        ScopeKey::new(&self.session_id, &self.workspace_root, &self.path)
    }

    /// Fold a newer proposal for the same scope into this entry.
    ///
    /// The id, creation time and original `old_content` are kept.
    pub(crate) fn absorb(&mut self, incoming: PendingChange) {
        self.change_type = ChangeType::merge(self.change_type, incoming.change_type);
        self.new_content = incoming.new_content;
        self.message_id = incoming.message_id.or(self.message_id.take());
        self.call_id = incoming.call_id.or(self.call_id.take());
        self.preview = Some(summarize(
            self.change_type,
            self.old_content.as_deref(),
            self.new_content.as_deref(),
        ));
    }
}

/// (session id, normalized workspace root, normalized relative path).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ScopeKey {
    session_id: String,
    root: String,
    path: String,
}

impl ScopeKey {
    pub(crate) fn new(session_id: &str, workspace_root: &str, path: &str) -> Self {
        Self {
            session_id: session_id.trim().to_string(),
            root: workspace::scope_key(workspace_root),
            path: workspace::relative_key(path),
        }
    }
}

/// One-line summary of a change for review lists.
pub fn summarize(change_type: ChangeType, old: Option<&str>, new: Option<&str>) -> String {
    let old_lines: Vec<&str> = old.map(|s| s.lines().collect()).unwrap_or_default();
    let new_lines: Vec<&str> = new.map(|s| s.lines().collect()).unwrap_or_default();
    match change_type {
        ChangeType::Create => format!("create: {} lines", new_lines.len()),
        ChangeType::Delete => format!("delete: {} lines", old_lines.len()),
        ChangeType::Edit => {
            let prefix = old_lines
                .iter()
                .zip(&new_lines)
                .take_while(|(a, b)| a == b)
                .count();
            let suffix = old_lines[prefix..]
                .iter()
                .rev()
                .zip(new_lines[prefix..].iter().rev())
                .take_while(|(a, b)| a == b)
                .count();
            let removed = old_lines.len() - prefix - suffix;
            let added = new_lines.len() - prefix - suffix;
            format!("edit: +{added} -{removed} lines")
        }
    }
}
