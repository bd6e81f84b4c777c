//! Pending registry: approval-gated file changes and shell commands.
//!
//! The registry is an explicitly constructed value shared through `Arc`. Entries live here
//! until a human resolves them. Scope lookups compare normalized workspace roots and paths,
//! so differently spelled roots resolve to the same entry. Applying an approved entry is
//! at-most-once: a per-id claim is taken before the side effect and concurrent resolves of
//! the same id fail fast.

pub mod change;
pub mod command;
pub mod resolution;

pub use change::{ChangeType, PendingChange};
pub use command::{DecisionMode, PendingCommand, SessionPolicy};
pub use resolution::{
    Decision, ResolutionRequest, ResolutionResponse, ResolutionStatus, Resolved,
};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ToolConfig;
use crate::error::{Result, RikkiError};
use crate::shell::{self, ShellInvocation};
use crate::workspace;

use change::ScopeKey;

const DEFAULT_OUTPUT_PREVIEW_BYTES: usize = 30_000;

/// Any entry held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingEntry {
    Change(PendingChange),
    Command(PendingCommand),
}

impl PendingEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::Change(c) => &c.id,
            Self::Command(c) => &c.id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Change(c) => &c.session_id,
            Self::Command(c) => &c.session_id,
        }
    }

    pub fn workspace_root(&self) -> &str {
        match self {
            Self::Change(c) => &c.workspace_root,
            Self::Command(c) => &c.workspace_root,
        }
    }
}

/// Notification delivered to registry listeners.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Added(PendingEntry),
    Merged(PendingEntry),
    Resolved {
        entry: PendingEntry,
        status: ResolutionStatus,
    },
    Removed(PendingEntry),
    Cleared {
        session_id: Option<String>,
        count: usize,
    },
}

pub type RegistryListener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Serializable copy of every queued entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSnapshot {
    #[serde(default)]
    pub changes: Vec<PendingChange>,
    #[serde(default)]
    pub commands: Vec<PendingCommand>,
}

#[derive(Default)]
struct RegistryState {
    changes: Vec<PendingChange>,
    commands: Vec<PendingCommand>,
    claims: HashSet<String>,
    policies: HashMap<String, SessionPolicy>,
}

impl RegistryState {
    fn find(&self, id: &str) -> Option<PendingEntry> {
        self.changes
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .map(PendingEntry::Change)
            .or_else(|| {
                self.commands
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
                    .map(PendingEntry::Command)
            })
    }

    fn take(&mut self, id: &str) -> Option<PendingEntry> {
        if let Some(pos) = self.changes.iter().position(|c| c.id == id) {
            return Some(PendingEntry::Change(self.changes.remove(pos)));
        }
        if let Some(pos) = self.commands.iter().position(|c| c.id == id) {
            return Some(PendingEntry::Command(self.commands.remove(pos)));
        }
        None
    }
}

/// Thread-safe store of mutations awaiting a human decision.
pub struct PendingRegistry {
    state: Mutex<RegistryState>,
    listeners: RwLock<Vec<RegistryListener>>,
    output_preview_bytes: usize,
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PendingRegistry")
            .field("changes", &state.changes.len())
            .field("commands", &state.commands.len())
            .field("claims", &state.claims.len())
            .finish()
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a resolve claim even if the resolving future is dropped.
struct Claim<'a> {
    registry: &'a PendingRegistry,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.registry.lock().claims.remove(&self.id);
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            listeners: RwLock::new(Vec::new()),
            output_preview_bytes: DEFAULT_OUTPUT_PREVIEW_BYTES,
        }
    }

    /// Registry whose resolution responses keep as much command output as a tool result.
    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new().with_output_preview_bytes(config.output_preview_chars)
    }

    /// Bound the command output echoed in resolution responses.
    pub fn with_output_preview_bytes(mut self, bytes: usize) -> Self {
        self.output_preview_bytes = bytes;
        self
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, listener: RegistryListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, event: RegistryEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Queue a file change, merging into an existing entry with the same scope.
    ///
    /// Returns the stored entry, whose id is the existing one on merge.
    pub fn add_change(&self, change: PendingChange) -> PendingChange {
        let scope = change.scope();
        let (stored, merged) = {
            let mut state = self.lock();
            match state.changes.iter_mut().find(|c| c.scope() == scope) {
                Some(existing) => {
                    existing.absorb(change);
                    (existing.clone(), true)
                }
                None => {
                    state.changes.push(change.clone());
                    (change, false)
                }
            }
        };

        tracing::debug!(
            id = %stored.id,
            path = %stored.path,
            session_id = %stored.session_id,
            change_type = %stored.change_type,
            merged,
            "Pending change queued"
        );
        let entry = PendingEntry::Change(stored.clone());
        self.notify(if merged {
            RegistryEvent::Merged(entry)
        } else {
            RegistryEvent::Added(entry)
        });
        stored
    }

    /// Queue a shell command, merging into an identical command of the same session and root.
    pub fn add_command(&self, command: PendingCommand) -> PendingCommand {
        let command = command.normalized();
        let (stored, merged) = {
            let mut state = self.lock();
            match state.commands.iter_mut().find(|c| c.same_scope(&command)) {
                Some(existing) => {
                    existing.absorb(command);
                    (existing.clone(), true)
                }
                None => {
                    state.commands.push(command.clone());
                    (command, false)
                }
            }
        };

        tracing::debug!(
            id = %stored.id,
            session_id = %stored.session_id,
            family = %stored.command_family,
            category = %stored.risk_category,
            merged,
            "Pending command queued"
        );
        let entry = PendingEntry::Command(stored.clone());
        self.notify(if merged {
            RegistryEvent::Merged(entry)
        } else {
            RegistryEvent::Added(entry)
        });
        stored
    }

    pub fn add(&self, entry: PendingEntry) -> PendingEntry {
        match entry {
            PendingEntry::Change(c) => PendingEntry::Change(self.add_change(c)),
            PendingEntry::Command(c) => PendingEntry::Command(self.add_command(c)),
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get_by_id(&self, id: &str) -> Option<PendingEntry> {
        self.lock().find(id)
    }

    /// Change queued for `path` in exactly this session and workspace.
    pub fn get_by_scope(
        &self,
        path: &str,
        workspace_root: &str,
        session_id: &str,
    ) -> Option<PendingChange> {
        if session_id.trim().is_empty()
            || workspace_root.trim().is_empty()
            || path.trim().is_empty()
        {
            return None;
        }
        let scope = ScopeKey::new(session_id, workspace_root, path);
        self.lock()
            .changes
            .iter()
            .find(|c| c.scope() == scope)
            .cloned()
    }

    /// Changes matching the given root and session; `None` matches anything.
    pub fn list_changes(
        &self,
        workspace_root: Option<&str>,
        session_id: Option<&str>,
    ) -> Vec<PendingChange> {
        let root = workspace_root.map(workspace::scope_key);
        self.lock()
            .changes
            .iter()
            .filter(|c| in_scope(&c.workspace_root, &c.session_id, root.as_deref(), session_id))
            .cloned()
            .collect()
    }

    pub fn list_commands(
        &self,
        workspace_root: Option<&str>,
        session_id: Option<&str>,
    ) -> Vec<PendingCommand> {
        let root = workspace_root.map(workspace::scope_key);
        self.lock()
            .commands
            .iter()
            .filter(|c| in_scope(&c.workspace_root, &c.session_id, root.as_deref(), session_id))
            .cloned()
            .collect()
    }

    pub fn has_pending_for_session(&self, session_id: &str) -> bool {
        let state = self.lock();
        state.changes.iter().any(|c| c.session_id == session_id)
            || state.commands.iter().any(|c| c.session_id == session_id)
    }

    // -----------------------------------------------------------------------
    // Session policy
    // -----------------------------------------------------------------------

    /// Whether a command of `command_family` may run without asking again.
    pub fn should_auto_approve(
        &self,
        session_id: &str,
        command_family: &str,
        strict: bool,
    ) -> bool {
        if strict || session_id.trim().is_empty() {
            return false;
        }
        self.lock()
            .policies
            .get(session_id)
            .is_some_and(|policy| policy.allows(command_family, strict))
    }

    pub fn session_policy(&self, session_id: &str) -> SessionPolicy {
        self.lock()
            .policies
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Drop an entry without applying it.
    pub fn remove(&self, id: &str) -> Option<PendingEntry> {
        let removed = self.lock().take(id);
        if let Some(entry) = &removed {
            self.notify(RegistryEvent::Removed(entry.clone()));
        }
        removed
    }

    /// Drop every entry of one session, or everything when `session_id` is `None`.
    ///
    /// Session policies go with the session.
    pub fn clear(&self, session_id: Option<&str>) -> usize {
        let count = {
            let mut state = self.lock();
            let before = state.changes.len() + state.commands.len();
            match session_id {
                Some(session) => {
                    state.changes.retain(|c| c.session_id != session);
                    state.commands.retain(|c| c.session_id != session);
                    state.policies.remove(session);
                }
                None => {
                    state.changes.clear();
                    state.commands.clear();
                    state.policies.clear();
                }
            }
            before - state.changes.len() - state.commands.len()
        };
        self.notify(RegistryEvent::Cleared {
            session_id: session_id.map(str::to_string),
            count,
        });
        count
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn export(&self) -> PendingSnapshot {
        let state = self.lock();
        PendingSnapshot {
            changes: state.changes.clone(),
            commands: state.commands.clone(),
        }
    }

    /// Re-queue exported entries, merging by scope like [`add`](Self::add).
    pub fn import(&self, snapshot: PendingSnapshot) {
        for change in snapshot.changes {
            self.add_change(change);
        }
        for command in snapshot.commands {
            self.add_command(command);
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Approve or reject an entry by id.
    pub async fn resolve(&self, id: &str, decision: Decision) -> Result<Resolved> {
        self.resolve_with_mode(id, decision, DecisionMode::Manual)
            .await
    }

    /// Approve or reject an entry, recording `mode` in the session policy on approval.
    ///
    /// A failed apply leaves the entry queued.
    pub async fn resolve_with_mode(
        &self,
        id: &str,
        decision: Decision,
        mode: DecisionMode,
    ) -> Result<Resolved> {
        let (claim, entry) = self.claim(id)?;

        let resolved = match decision {
            Decision::Reject => Resolved {
                status: ResolutionStatus::Rejected,
                entry: entry.clone(),
                output: None,
            },
            Decision::Approve => match &entry {
                PendingEntry::Change(change) => {
                    if let Err(e) = apply_change(change).await {
                        tracing::warn!(
                            id,
                            path = %change.path,
                            error = %e,
                            "Pending change apply failed"
                        );
                        return Err(e);
                    }
                    Resolved {
                        status: ResolutionStatus::Applied,
                        entry: entry.clone(),
                        output: None,
                    }
                }
                PendingEntry::Command(command) => {
                    let output = run_command(command).await.map_err(|e| {
                        tracing::warn!(
                            id,
                            command = %command.command,
                            error = %e,
                            "Pending command failed to run"
                        );
                        e
                    })?;
                    Resolved {
                        status: ResolutionStatus::Applied,
                        entry: entry.clone(),
                        output: Some(output),
                    }
                }
            },
        };

        {
            let mut state = self.lock();
            if let PendingEntry::Command(command) = &entry {
                if decision == Decision::Approve {
                    state
                        .policies
                        .entry(command.session_id.clone())
                        .or_default()
                        .record(command, mode);
                }
            }
            let current = state.find(id);
            if current.as_ref() == Some(&entry) {
                state.take(id);
            } else if current.is_some() {
                tracing::debug!(id, "Entry changed while resolving; keeping the newer proposal");
            }
        }
        drop(claim);

        tracing::info!(id, status = %resolved.status, "Pending entry resolved");
        self.notify(RegistryEvent::Resolved {
            entry: resolved.entry.clone(),
            status: resolved.status,
        });
        Ok(resolved)
    }

    fn claim(&self, id: &str) -> Result<(Claim<'_>, PendingEntry)> {
        let mut state = self.lock();
        let entry = state.find(id).ok_or_else(|| {
            RikkiError::ApprovalScope(format!("Pending entry not found for id: {id}"))
        })?;
        if !state.claims.insert(id.to_string()) {
            return Err(RikkiError::InvalidState(format!(
                "Pending entry {id} is already being resolved"
            )));
        }
        Ok((
            Claim {
                registry: self,
                id: id.to_string(),
            },
            entry,
        ))
    }

    /// Handle an approval resolution request from a front end.
    ///
    /// Never fails: problems are reported as `status = error`.
    pub async fn resolve_request(&self, request: &ResolutionRequest) -> ResolutionResponse {
        let id = match self.locate(request) {
            Ok(id) => id,
            Err(e) => return ResolutionResponse::error(e.to_string()),
        };
        let decision = if request.reject {
            Decision::Reject
        } else {
            Decision::Approve
        };
        let mode = DecisionMode::parse_lenient(request.decision_mode.as_deref());
        match self.resolve_with_mode(&id, decision, mode).await {
            Ok(resolved) => ResolutionResponse::from_resolved(&resolved, self.output_preview_bytes),
            Err(e) => {
                let mut response = ResolutionResponse::error(e.to_string());
                response.id = Some(id);
                response
            }
        }
    }

    fn locate(&self, request: &ResolutionRequest) -> Result<String> {
        let session = non_blank(request.session_id.as_deref());
        let root = non_blank(request.workspace_root.as_deref());

        let by_id = non_blank(request.change_id.as_deref())
            .map(|id| ("change", id))
            .or_else(|| non_blank(request.command_id.as_deref()).map(|id| ("command", id)));
        if let Some((kind, id)) = by_id {
            let matches = self.get_by_id(id).is_some_and(|entry| {
                session.is_some_and(|s| s == entry.session_id())
                    && root.map_or(true, |r| {
                        workspace::scope_key(r) == workspace::scope_key(entry.workspace_root())
                    })
            });
            if !matches {
                return Err(RikkiError::ApprovalScope(format!(
                    "Pending {kind} not found for id: {id}"
                )));
            }
            return Ok(id.to_string());
        }

        let path = non_blank(request.path.as_deref());
        let (Some(session), Some(root), Some(path)) = (session, root, path) else {
            return Err(RikkiError::InvalidArgument(
                "sessionId, workspaceRoot and path are required when no id is given".to_string(),
            ));
        };
        self.get_by_scope(path, root, session)
            .map(|change| change.id)
            .ok_or_else(|| {
                RikkiError::ApprovalScope(format!(
                    "Pending change not found for scoped path: {path}"
                ))
            })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn in_scope(
    entry_root: &str,
    entry_session: &str,
    root_key: Option<&str>,
    session: Option<&str>,
) -> bool {
    root_key.map_or(true, |key| workspace::scope_key(entry_root) == key)
        && session.map_or(true, |s| s == entry_session)
}

async fn apply_change(change: &PendingChange) -> Result<()> {
    let target = workspace::resolve_within(&change.workspace_root, &change.path)?;
    match change.change_type {
        ChangeType::Delete => match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
        ChangeType::Create | ChangeType::Edit => {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = change.new_content.as_deref().unwrap_or_default();
            tokio::fs::write(&target, content).await?;
            Ok(())
        }
    }
}

async fn run_command(command: &PendingCommand) -> Result<shell::ShellOutput> {
    let cwd = if command.cwd.trim().is_empty() {
        workspace::root_path(&command.workspace_root)?
    } else {
        workspace::to_fs_path(&command.cwd)
    };
    let invocation = ShellInvocation {
        command: command.command.clone(),
        cwd,
        shell: shell::resolve_shell(Some(&command.shell)),
        timeout: Duration::from_millis(command.timeout_ms.max(1)),
    };
    shell::run(&invocation, &CancellationToken::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn edit(path: &str, content: &str, root: &str, session: &str) -> PendingChange {
        PendingChange::new(
            path,
            ChangeType::Edit,
            Some("old".into()),
            Some(content.into()),
            root,
            session,
        )
    }

    #[test]
    fn merge_keeps_one_entry_per_scope() {
        let registry = PendingRegistry::new();
        let first = registry.add_change(edit("src/a.rs", "one", r"D:\ws", "s1"));
        let second = registry.add_change(edit("src\\a.rs", "two", "/d/ws", "s1"));

        assert_eq!(first.id, second.id);
        let all = registry.list_changes(None, None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].new_content.as_deref(), Some("two"));
        assert_eq!(all[0].workspace_root, r"D:\ws");
    }

    #[test]
    fn different_sessions_do_not_merge() {
        let registry = PendingRegistry::new();
        registry.add_change(edit("a.rs", "one", "/ws", "s1"));
        registry.add_change(edit("a.rs", "two", "/ws", "s2"));
        assert_eq!(registry.list_changes(Some("/ws"), None).len(), 2);
        assert_eq!(registry.list_changes(Some("/ws"), Some("s2")).len(), 1);
        assert!(registry.get_by_scope("a.rs", "/ws", "s3").is_none());
    }

    #[test]
    fn listeners_see_adds_and_merges() {
        let registry = PendingRegistry::new();
        let added = Arc::new(AtomicUsize::new(0));
        let merged = Arc::new(AtomicUsize::new(0));
        let (a, m) = (added.clone(), merged.clone());
        registry.subscribe(Arc::new(move |event| match event {
            RegistryEvent::Added(_) => {
                a.fetch_add(1, Ordering::SeqCst);
            }
            RegistryEvent::Merged(_) => {
                m.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }));
        registry.add_change(edit("a.rs", "1", "/ws", "s1"));
        registry.add_change(edit("a.rs", "2", "/ws", "s1"));
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(merged.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn approve_writes_once_and_removes_entry() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let registry = PendingRegistry::new();
        let change = registry.add_change(PendingChange::new(
            "nested/dir/new.txt",
            ChangeType::Create,
            None,
            Some("hello".into()),
            root.as_str(),
            "s1",
        ));

        let resolved = registry.resolve(&change.id, Decision::Approve).await.unwrap();
        assert_eq!(resolved.status, ResolutionStatus::Applied);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("nested/dir/new.txt")).unwrap(),
            "hello"
        );
        assert!(registry.get_by_id(&change.id).is_none());
        assert!(matches!(
            registry.resolve(&change.id, Decision::Approve).await,
            Err(RikkiError::ApprovalScope(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_file_and_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("gone.txt"), "bye").unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let registry = PendingRegistry::new();
        for path in ["gone.txt", "never-existed.txt"] {
            let change = registry.add_change(PendingChange::new(
                path,
                ChangeType::Delete,
                None,
                None,
                root.as_str(),
                "s1",
            ));
            registry.resolve(&change.id, Decision::Approve).await.unwrap();
        }
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn reject_removes_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let registry = PendingRegistry::new();
        let change = registry.add_change(edit("a.txt", "x", &root, "s1"));
        let resolved = registry.resolve(&change.id, Decision::Reject).await.unwrap();
        assert_eq!(resolved.status, ResolutionStatus::Rejected);
        assert!(!dir.path().join("a.txt").exists());
        assert!(!registry.has_pending_for_session("s1"));
    }

    #[tokio::test]
    async fn held_claim_blocks_a_second_resolve() {
        let registry = PendingRegistry::new();
        let change = registry.add_change(edit("a.txt", "x", "/ws", "s1"));
        let (claim, _) = registry.claim(&change.id).unwrap();
        assert!(matches!(
            registry.resolve(&change.id, Decision::Reject).await,
            Err(RikkiError::InvalidState(_))
        ));
        drop(claim);
        registry.resolve(&change.id, Decision::Reject).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_approvals_apply_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let registry = PendingRegistry::new();
        let change = registry.add_change(PendingChange::new(
            "once.txt",
            ChangeType::Create,
            None,
            Some("x".into()),
            root.as_str(),
            "s1",
        ));

        let (first, second) = tokio::join!(
            registry.resolve(&change.id, Decision::Approve),
            registry.resolve(&change.id, Decision::Approve),
        );

        let results = [first, second];
        let applied = results
            .iter()
            .filter(|r| matches!(r, Ok(resolved) if resolved.status == ResolutionStatus::Applied))
            .count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(RikkiError::InvalidState(_))))
            .count();
        assert_eq!((applied, refused), (1, 1));
        assert_eq!(std::fs::read_to_string(dir.path().join("once.txt")).unwrap(), "x");
        assert!(registry.get_by_id(&change.id).is_none());
    }

    #[tokio::test]
    async fn resolution_output_follows_tool_preview_limit() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let registry = PendingRegistry::from_config(&ToolConfig {
            output_preview_chars: 5,
            ..ToolConfig::default()
        });
        let command = registry.add_command(
            PendingCommand::builder()
                .command("echo 0123456789")
                .cwd(root.as_str())
                .shell(shell::default_shell())
                .workspace_root(root.as_str())
                .session_id("s1")
                .build(),
        );

        let response = registry
            .resolve_request(
                &ResolutionRequest::builder()
                    .session_id("s1")
                    .command_id(command.id)
                    .build(),
            )
            .await;

        assert_eq!(response.status, ResolutionStatus::Applied);
        assert_eq!(response.exit_code, Some(0));
        assert_eq!(response.output.as_deref(), Some("01234\n…"));
    }

    #[test]
    fn clear_is_scoped_to_the_session() {
        let registry = PendingRegistry::new();
        registry.add_change(edit("a.rs", "1", "/ws", "s1"));
        registry.add_change(edit("b.rs", "1", "/ws", "s2"));
        assert_eq!(registry.clear(Some("s1")), 1);
        assert!(!registry.has_pending_for_session("s1"));
        assert!(registry.has_pending_for_session("s2"));
        assert_eq!(registry.clear(None), 1);
    }

    #[test]
    fn export_import_round_trips_through_json() {
        let registry = PendingRegistry::new();
        let change = registry.add_change(edit("a.rs", "1", "/ws", "s1"));
        let command = registry.add_command(
            PendingCommand::builder()
                .command("npm install")
                .cwd("/ws")
                .shell("/bin/sh")
                .workspace_root("/ws")
                .session_id("s1")
                .build(),
        );

        let json = serde_json::to_string(&registry.export()).unwrap();
        let restored = PendingRegistry::new();
        restored.import(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.get_by_id(&change.id), Some(PendingEntry::Change(change)));
        assert_eq!(restored.get_by_id(&command.id), Some(PendingEntry::Command(command)));
    }

    #[test]
    fn snapshot_uses_type_discriminator_for_change_kind() {
        let registry = PendingRegistry::new();
        registry.add_change(PendingChange::new(
            "a.rs",
            ChangeType::Create,
            None,
            Some("x".into()),
            "/ws",
            "s1",
        ));
        let value = serde_json::to_value(registry.export()).unwrap();
        assert_eq!(value["changes"][0]["type"], "CREATE");
        assert_eq!(value["changes"][0]["workspace_root"], "/ws");
    }
}
