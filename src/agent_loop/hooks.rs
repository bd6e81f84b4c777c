//! Collaborator hooks: workspace snapshots and context compaction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{PartKind, Usage};

use super::types::Turn;

/// Opaque handle returned by a [`SnapshotStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHandle(pub String);

impl std::fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Takes and restores workspace snapshots around model steps.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn take(&self, workspace_root: &str) -> Result<SnapshotHandle>;

    async fn restore(&self, workspace_root: &str, handle: &SnapshotHandle) -> Result<()>;
}

/// Called with step usage; `true` means the context window overflowed.
pub type CompactionCheck = Arc<dyn Fn(&Usage) -> bool + Send + Sync>;

/// Restore the workspace to the snapshot taken when `turn` started.
///
/// Returns `false` when the turn recorded no snapshot.
pub async fn restore_turn_start(store: &dyn SnapshotStore, turn: &Turn) -> Result<bool> {
    let handle = turn.parts.iter().find_map(|part| match &part.kind {
        PartKind::StepStart(step) => step.snapshot.clone(),
        _ => None,
    });
    match handle {
        Some(handle) => {
            store
                .restore(&turn.workspace_root, &SnapshotHandle(handle))
                .await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
