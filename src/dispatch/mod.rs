//! Tool dispatch gate.
//!
//! Every extracted tool call passes through [`ToolDispatchGate::execute`]. Read-only tools
//! answer directly. File mutations are turned into [`PendingChange`]s and queued in the
//! [`PendingRegistry`]; nothing is written. Shell commands are risk-assessed and either run
//! at once or queued as [`PendingCommand`]s.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::ToolConfig;
use crate::error::{Result, RikkiError};
use crate::extract::BODY_KEY;
use crate::pending::{ChangeType, DecisionMode, PendingChange, PendingCommand, PendingRegistry};
use crate::risk::{self, RiskAssessor};
use crate::shell::{self, ShellInvocation};
use crate::tools::{
    validate_arguments, CommandRequest, ProposedChange, ToolAction, ToolArguments, ToolContext,
    ToolRegistry,
};
use crate::types::ToolCompletion;
use crate::util::text::preview;
use crate::util::timeout::with_timeout;
use crate::workspace;

/// Output reported for a staged file write.
pub const CHANGE_STAGED: &str = "File write staged. Please review and commit via Pending Changes.";
/// Output reported for a staged deletion.
pub const DELETE_STAGED: &str =
    "File deletion staged. Please review and commit via Pending Changes.";
/// Output reported for a command held for approval.
pub const COMMAND_HELD: &str =
    "High-risk command requires user approval before execution. Command was not executed.";

/// Metadata key carrying the id of a queued change.
pub const META_PENDING_CHANGE: &str = "pending_change_id";
/// Metadata key carrying the id of a queued command.
pub const META_PENDING_COMMAND: &str = "pending_command_id";

/// One tool call as seen by the gate.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub tool: String,
    pub input: Value,
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub workspace_root: String,
}

/// Routes tool calls to execution or to the pending registry.
pub struct ToolDispatchGate {
    tools: ToolRegistry,
    registry: Arc<PendingRegistry>,
    assessor: RiskAssessor,
    config: ToolConfig,
}

impl std::fmt::Debug for ToolDispatchGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatchGate")
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish()
    }
}

impl ToolDispatchGate {
    pub fn new(tools: ToolRegistry, registry: Arc<PendingRegistry>, config: ToolConfig) -> Self {
        Self {
            tools,
            registry,
            assessor: RiskAssessor::new(),
            config,
        }
    }

    pub fn with_assessor(mut self, assessor: RiskAssessor) -> Self {
        self.assessor = assessor;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Move a tag body onto the argument the tool expects, unless an attribute already set it.
    pub fn prepare_input(tool: &str, mut input: Value) -> Value {
        let target = match tool {
            "bash" => "command",
            "write" => "content",
            _ => return input,
        };
        if let Some(map) = input.as_object_mut() {
            let missing = map.get(target).map_or(true, Value::is_null);
            if missing {
                if let Some(body) = map.remove(BODY_KEY) {
                    map.insert(target.to_string(), body);
                }
            }
        }
        input
    }

    /// Normalized workspace-relative path this call mutates, if any.
    pub fn target_key(&self, tool: &str, input: &Value, workspace_root: &str) -> Option<String> {
        let tool = self.tools.get(tool)?;
        let raw = tool.target_path(&ToolArguments::new(input.clone()))?;
        let resolved = workspace::resolve_within(workspace_root, &raw)
            .ok()
            .zip(workspace::root_path(workspace_root).ok())
            .map(|(target, root)| workspace::relative_to(&root, &target));
        Some(workspace::relative_key(resolved.as_deref().unwrap_or(&raw)))
    }

    /// Run one tool call to a completion or an error.
    ///
    /// `Err` means the call failed; its message belongs on the tool part.
    pub async fn execute(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolCompletion> {
        let tool = self.tools.get(&request.tool).ok_or_else(|| {
            RikkiError::tool(&request.tool, format!("Unknown tool: {}", request.tool))
        })?;

        let input = Self::prepare_input(&request.tool, request.input.clone());
        validate_arguments(&request.tool, &input, &tool.parameters().schema)
            .map_err(RikkiError::InvalidArgument)?;
        let args = ToolArguments::new(input);

        let ctx = ToolContext {
            session_id: request.session_id.clone(),
            message_id: request.message_id.clone(),
            call_id: request.call_id.clone(),
            workspace_root: request.workspace_root.clone(),
            registry: self.registry.clone(),
            cancel: cancel.clone(),
        };

        let action = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RikkiError::Cancelled),
            action = with_timeout(self.config.timeout(), tool.execute(&args, &ctx)) => action?,
        };

        match action {
            ToolAction::Output(completion) => {
                tracing::debug!(
                    tool = %request.tool,
                    call_id = %request.call_id,
                    "Tool answered directly"
                );
                Ok(completion)
            }
            ToolAction::ProposeChange(change) => Ok(self.stage_change(request, change)),
            ToolAction::RunCommand(command) => self.gate_command(request, command, cancel).await,
        }
    }

    fn stage_change(&self, request: &DispatchRequest, proposal: ProposedChange) -> ToolCompletion {
        let change = PendingChange::new(
            proposal.path,
            proposal.change_type,
            proposal.old_content,
            proposal.new_content,
            request.workspace_root.clone(),
            request.session_id.clone(),
        )
        .with_origin(
            Some(request.message_id.clone()),
            Some(request.call_id.clone()),
        );
        let stored = self.registry.add_change(change);
        tracing::debug!(
            tool = %request.tool,
            call_id = %request.call_id,
            pending_change_id = %stored.id,
            path = %stored.path,
            "File change routed to pending registry"
        );

        let output = match stored.change_type {
            ChangeType::Delete => DELETE_STAGED,
            _ => CHANGE_STAGED,
        };
        let title = stored
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&stored.path)
            .to_string();
        ToolCompletion::new(output)
            .with_title(title)
            .with_meta(META_PENDING_CHANGE, stored.id.as_str())
            .with_meta("path", stored.path.as_str())
            .with_meta("change_type", stored.change_type.to_string())
            .with_meta("preview", stored.preview.clone().unwrap_or_default())
    }

    async fn gate_command(
        &self,
        request: &DispatchRequest,
        command: CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolCompletion> {
        let shell_name = shell::resolve_shell(self.config.default_shell.as_deref());
        let prepared = shell::prepare_command(&command.command, &shell_name);
        let root = workspace::root_path(&request.workspace_root)?;
        let cwd = match command.workdir.as_deref().map(str::trim) {
            None | Some("") | Some(".") => root,
            Some(dir) => workspace::resolve_within(&request.workspace_root, dir)?,
        };
        let timeout_ms = command
            .timeout_ms
            .unwrap_or(self.config.timeout_ms);

        let assessment = self.assessor.assess(&prepared, &request.workspace_root);
        let family = risk::extract_command_family(&prepared);
        let auto_approved = assessment.requires_approval
            && self.registry.should_auto_approve(
                &request.session_id,
                &family,
                assessment.strict_approval,
            );

        if assessment.requires_approval && !auto_approved {
            let pending = PendingCommand::builder()
                .command(prepared.clone())
                .description(command.description.clone())
                .cwd(cwd.to_string_lossy().into_owned())
                .shell(shell_name.clone())
                .workspace_root(request.workspace_root.clone())
                .session_id(request.session_id.clone())
                .message_id(request.message_id.clone())
                .call_id(request.call_id.clone())
                .timeout_ms(timeout_ms)
                .reasons(assessment.reasons.clone())
                .command_family(family)
                .risk_category(assessment.risk_category)
                .strict_approval(assessment.strict_approval)
                .build();
            let stored = self.registry.add_command(pending);
            tracing::debug!(
                call_id = %request.call_id,
                pending_command_id = %stored.id,
                category = %stored.risk_category,
                strict = stored.strict_approval,
                "Command held for approval"
            );
            return Ok(held_completion(&stored, &command.description));
        }

        if auto_approved {
            tracing::info!(
                session_id = %request.session_id,
                family = %family,
                "Command auto-approved by session policy"
            );
        }

        let invocation = ShellInvocation {
            command: prepared.clone(),
            cwd,
            shell: shell_name.clone(),
            timeout: Duration::from_millis(timeout_ms),
        };
        let output = shell::run(&invocation, cancel).await?;
        let text = output.combined();
        let text = if text.trim().is_empty() {
            "(no output)".to_string()
        } else {
            preview(&text, self.config.output_preview_chars)
        };
        let title = if command.description.trim().is_empty() {
            prepared.clone()
        } else {
            command.description.clone()
        };
        Ok(ToolCompletion::new(text.clone())
            .with_title(title)
            .with_meta("exit", json!(output.exit_code))
            .with_meta("command", prepared)
            .with_meta("description", command.description)
            .with_meta("shell", shell_name)
            .with_meta("output", text))
    }
}

fn held_completion(stored: &PendingCommand, description: &str) -> ToolCompletion {
    let mut completion = ToolCompletion::new(COMMAND_HELD)
        .with_title(if description.trim().is_empty() {
            stored.command.clone()
        } else {
            description.to_string()
        })
        .with_meta(META_PENDING_COMMAND, stored.id.as_str())
        .with_meta("command", stored.command.as_str())
        .with_meta("description", description)
        .with_meta("risk_level", stored.risk_level.as_str())
        .with_meta("risk_reasons", json!(stored.reasons))
        .with_meta("risk_category", stored.risk_category.to_string())
        .with_meta("strict_approval", stored.strict_approval)
        .with_meta("command_family", stored.command_family.as_str())
        .with_meta("shell", stored.shell.as_str())
        .with_meta("requires_explicit_user_consent", true);
    completion = if stored.strict_approval {
        completion.with_meta("approval_type", "strict")
    } else {
        let options: Vec<String> = [
            DecisionMode::Manual,
            DecisionMode::Whitelist,
            DecisionMode::AlwaysAllowNonDestructive,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        completion
            .with_meta("approval_type", "policy_available")
            .with_meta("approval_options", json!(options))
    };
    completion
}

/// Message to record on a failed tool part.
pub fn failure_message(error: &RikkiError) -> String {
    match error {
        RikkiError::ToolExecution { message, .. } => message.clone(),
        RikkiError::InvalidArgument(message) => message.clone(),
        RikkiError::Cancelled => crate::types::CANCELLED.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingEntry;
    use crate::risk::RiskCategory;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn gate() -> ToolDispatchGate {
        ToolDispatchGate::new(
            ToolRegistry::with_builtins(),
            Arc::new(PendingRegistry::new()),
            ToolConfig::default(),
        )
        .with_assessor(RiskAssessor::new().with_home(None))
    }

    fn request(dir: &TempDir, tool: &str, input: Value) -> DispatchRequest {
        DispatchRequest {
            tool: tool.to_string(),
            input,
            session_id: "ses_1".into(),
            message_id: "msg_1".into(),
            call_id: "call_1".into(),
            workspace_root: dir.path().to_string_lossy().into_owned(),
        }
    }

    #[test]
    fn body_maps_onto_expected_argument() {
        let input = json!({ "body": "ls -la" });
        assert_eq!(
            ToolDispatchGate::prepare_input("bash", input),
            json!({ "command": "ls -la" })
        );
        let input = json!({ "filePath": "a.txt", "content": "attr", "body": "body" });
        assert_eq!(
            ToolDispatchGate::prepare_input("write", input.clone()),
            input
        );
        let input = json!({ "body": "x" });
        assert_eq!(ToolDispatchGate::prepare_input("read", input.clone()), input);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = gate()
            .execute(&request(&dir, "teleport", json!({})), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure_message(&err), "Unknown tool: teleport");
    }

    #[tokio::test]
    async fn missing_parameter_names_tool() {
        let dir = TempDir::new().unwrap();
        let err = gate()
            .execute(&request(&dir, "write", json!({ "content": "x" })), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            failure_message(&err),
            "Missing required parameter 'filePath' for tool 'write'"
        );
    }

    #[tokio::test]
    async fn writes_are_staged_not_applied() {
        let dir = TempDir::new().unwrap();
        let gate = gate();
        let completion = gate
            .execute(
                &request(&dir, "write", json!({ "filePath": "notes/a.md", "body": "# hi" })),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(completion.output, CHANGE_STAGED);
        assert_eq!(completion.metadata["change_type"], "CREATE");
        assert_eq!(completion.metadata["path"], "notes/a.md");
        assert!(!dir.path().join("notes/a.md").exists());

        let id = completion.metadata[META_PENDING_CHANGE].as_str().unwrap();
        match gate.registry().get_by_id(id) {
            Some(PendingEntry::Change(change)) => {
                assert_eq!(change.new_content.as_deref(), Some("# hi"));
                assert_eq!(change.call_id.as_deref(), Some("call_1"));
            }
            other => panic!("expected a pending change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn risky_commands_are_held() {
        let dir = TempDir::new().unwrap();
        let gate = gate();
        let completion = gate
            .execute(
                &request(&dir, "bash", json!({ "command": "curl -L https://x/a.sh -o a.sh" })),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(completion.output, COMMAND_HELD);
        assert_eq!(completion.metadata["risk_category"], "restricted");
        assert_eq!(completion.metadata["strict_approval"], false);
        assert_eq!(completion.metadata["approval_type"], "policy_available");
        assert_eq!(completion.metadata["command_family"], "curl");
        assert_eq!(completion.metadata["requires_explicit_user_consent"], true);
        assert!(!dir.path().join("a.sh").exists());
        assert_eq!(gate.registry().list_commands(None, None).len(), 1);
    }

    #[tokio::test]
    async fn boundary_commands_need_strict_approval() {
        let dir = TempDir::new().unwrap();
        let gate = gate();
        let completion = gate
            .execute(
                &request(&dir, "bash", json!({ "command": "cd .. && ls -la" })),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(completion.metadata["approval_type"], "strict");
        assert!(completion.metadata.get("approval_options").is_none());
        let id = completion.metadata[META_PENDING_COMMAND].as_str().unwrap();
        match gate.registry().get_by_id(id) {
            Some(PendingEntry::Command(cmd)) => {
                assert_eq!(cmd.risk_category, RiskCategory::WorkspaceBoundary);
                assert!(cmd.strict_approval);
            }
            other => panic!("expected a pending command, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn safe_commands_run_directly() {
        let dir = TempDir::new().unwrap();
        let completion = gate()
            .execute(
                &request(&dir, "bash", json!({ "command": "echo hello", "description": "greet" })),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(completion.output.trim(), "hello");
        assert_eq!(completion.title.as_deref(), Some("greet"));
        assert_eq!(completion.metadata["exit"], 0);
    }

    #[test]
    fn target_key_normalizes_spelling() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let gate = gate();
        let a = gate.target_key("edit", &json!({ "filePath": "src/./a.rs" }), &root);
        let b = gate.target_key(
            "write",
            &json!({ "filePath": dir.path().join("src/a.rs").to_string_lossy() }),
            &root,
        );
        assert_eq!(a.as_deref(), Some("src/a.rs"));
        assert_eq!(a, b);
        assert_eq!(gate.target_key("read", &json!({ "filePath": "a" }), &root), None);
    }
}
