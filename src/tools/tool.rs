//! Tool trait, execution context and closure-based tool wrapper.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::types::AgentToolParameters;
use crate::error::{Result, RikkiError};
use crate::pending::{ChangeType, PendingRegistry};
use crate::types::ToolCompletion;
use crate::workspace;

/// A file mutation proposed by a tool. Never written directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedChange {
    /// Relative to the workspace root, slash-separated.
    pub path: String,
    pub change_type: ChangeType,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
}

/// A shell command a tool wants to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub description: String,
    /// Working directory, relative to the workspace root.
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// What a tool asks the dispatch gate to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    /// Finished; report this result.
    Output(ToolCompletion),
    /// Queue a file mutation for approval.
    ProposeChange(ProposedChange),
    /// Run a shell command, subject to risk assessment.
    RunCommand(CommandRequest),
}

/// Context available during tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    /// As supplied by the caller, not normalized.
    pub workspace_root: String,
    pub registry: Arc<PendingRegistry>,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("call_id", &self.call_id)
            .field("workspace_root", &self.workspace_root)
            .finish()
    }
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        workspace_root: impl Into<String>,
        registry: Arc<PendingRegistry>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: String::new(),
            call_id: String::new(),
            workspace_root: workspace_root.into(),
            registry,
            cancel: CancellationToken::new(),
        }
    }

    /// Absolute filesystem path and workspace-relative key for `path`.
    pub fn resolve(&self, path: &str) -> Result<(PathBuf, String)> {
        let absolute = workspace::resolve_within(&self.workspace_root, path)?;
        let root = workspace::root_path(&self.workspace_root)?;
        let relative = workspace::relative_to(&root, &absolute);
        Ok((absolute, relative))
    }

    /// Directory inside the workspace; `None` or `.` is the root itself.
    pub fn resolve_dir(&self, path: Option<&str>) -> Result<PathBuf> {
        match path.map(str::trim) {
            None | Some("") | Some(".") | Some("./") => workspace::root_path(&self.workspace_root),
            Some(dir) => workspace::resolve_within(&self.workspace_root, dir),
        }
    }

    /// Content of `path` as this session currently sees it.
    ///
    /// A queued change for the same scope wins over the disk; a queued delete reads as missing.
    pub async fn current_content(&self, path: &str) -> Result<Option<String>> {
        let (absolute, relative) = self.resolve(path)?;
        if let Some(pending) =
            self.registry
                .get_by_scope(&relative, &self.workspace_root, &self.session_id)
        {
            return Ok(match pending.change_type {
                ChangeType::Delete => None,
                _ => pending.new_content,
            });
        }
        match tokio::fs::read_to_string(&absolute).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RikkiError::Io(e)),
        }
    }
}

/// Core tool trait. Implement to create custom tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match the tag the model emits).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &AgentToolParameters;

    /// File this call mutates, used to serialize same-path calls within a turn.
    fn target_path(&self, _args: &ToolArguments) -> Option<String> {
        None
    }

    /// Execute the tool with parsed arguments.
    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<ToolAction>;
}

/// Type alias for the tool handler function.
type ToolHandler = dyn Fn(
        ToolArguments,
        ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolAction>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    path_argument: Option<String>,
    handler: Arc<ToolHandler>,
}

impl AgentTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolAction>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            path_argument: None,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Mark the argument naming the file this tool mutates.
    pub fn with_path_argument(mut self, key: impl Into<String>) -> Self {
        self.path_argument = Some(key.into());
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    fn target_path(&self, args: &ToolArguments) -> Option<String> {
        let key = self.path_argument.as_deref()?;
        args.get_non_empty(key).map(str::to_string)
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<ToolAction> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}
