//! Turn controller: owns the parts of one assistant turn.
//!
//! Deltas are fed through a [`TagExtractor`]. Text spans accumulate into the open text part;
//! each extracted tool call closes it, appends a tool part in `pending` and is dispatched on
//! its own task so the stream keeps flowing. Calls that mutate the same path run one after
//! another, in extraction order. Tool tasks report back over a channel that the controller
//! drains on every call and awaits at completion.

use std::collections::HashMap;
use std::sync::Arc;

use bon::Builder;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatch::{
    failure_message, DispatchRequest, ToolDispatchGate, META_PENDING_CHANGE, META_PENDING_COMMAND,
};
use crate::error::{Result, RikkiError};
use crate::extract::{ExtractEvent, TagExtractor, ToolCallRecord};
use crate::types::{
    FinishReason, Part, PartKind, StepFinishPart, StepStartPart, TextPart, ToolCompletion,
    ToolPart, ToolStatus, Usage, CANCELLED, INTERRUPTED,
};
use crate::util::id;

use super::events::{
    ApprovalKind, TurnEventEmitter, TurnEventPayload, TurnEventSink, TurnLifecycle,
};
use super::hooks::{CompactionCheck, SnapshotStore};
use super::types::{NextAction, Turn, TurnId, TurnOutcome, TurnState};

const DEFAULT_DOOM_LOOP_THRESHOLD: usize = 3;

/// Everything a turn needs besides the dispatch gate.
#[derive(Builder)]
pub struct TurnRequest {
    #[builder(default = Uuid::new_v4())]
    pub turn_id: TurnId,
    #[builder(into)]
    pub session_id: String,
    #[builder(into, default = id::ascending("msg"))]
    pub message_id: String,
    #[builder(into)]
    pub workspace_root: String,
    pub event_sink: Option<TurnEventSink>,
    pub snapshots: Option<Arc<dyn SnapshotStore>>,
    pub compaction: Option<CompactionCheck>,
    /// Parent token; cancelling it cancels the turn's tool calls.
    pub cancel: Option<CancellationToken>,
    pub doom_loop_threshold: Option<usize>,
}

#[derive(Debug)]
enum ToolEvent {
    Started,
    Finished(std::result::Result<ToolCompletion, String>),
}

#[derive(Debug)]
struct ToolUpdate {
    index: usize,
    event: ToolEvent,
}

/// Reports a tool task's progress; a task dropped without finishing reports a failure.
struct ToolReporter {
    tx: mpsc::UnboundedSender<ToolUpdate>,
    index: usize,
    finished: bool,
}

impl ToolReporter {
    fn started(&self) {
        let _ = self.tx.send(ToolUpdate {
            index: self.index,
            event: ToolEvent::Started,
        });
    }

    fn finish(&mut self, result: std::result::Result<ToolCompletion, String>) {
        self.finished = true;
        let _ = self.tx.send(ToolUpdate {
            index: self.index,
            event: ToolEvent::Finished(result),
        });
    }
}

impl Drop for ToolReporter {
    fn drop(&mut self) {
        if !self.finished {
            let message = if std::thread::panicking() {
                "tool task panicked"
            } else {
                "tool task aborted"
            };
            let _ = self.tx.send(ToolUpdate {
                index: self.index,
                event: ToolEvent::Finished(Err(message.to_string())),
            });
        }
    }
}

/// State machine for one assistant turn.
pub struct TurnController {
    turn_id: TurnId,
    session_id: String,
    message_id: String,
    workspace_root: String,
    state: TurnState,
    parts: Vec<Part>,
    open_text: Option<usize>,
    open_reasoning: Option<usize>,
    extractor: TagExtractor,
    gate: Arc<ToolDispatchGate>,
    emitter: TurnEventEmitter,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    compaction: Option<CompactionCheck>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    outstanding: usize,
    updates_tx: mpsc::UnboundedSender<ToolUpdate>,
    updates_rx: mpsc::UnboundedReceiver<ToolUpdate>,
    path_tails: HashMap<String, oneshot::Receiver<()>>,
    repeats: HashMap<(String, String), usize>,
    doom_loop_threshold: usize,
    usage: Usage,
    overflow: bool,
    awaiting_approval: bool,
    finish: Option<FinishReason>,
    error: Option<String>,
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnController")
            .field("turn_id", &self.turn_id)
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("parts", &self.parts.len())
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl TurnController {
    pub fn new(request: TurnRequest, gate: Arc<ToolDispatchGate>) -> Self {
        let extractor = TagExtractor::with_tool_names(gate.tools().names());
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            turn_id: request.turn_id,
            session_id: request.session_id,
            message_id: request.message_id,
            workspace_root: request.workspace_root,
            state: TurnState::Idle,
            parts: Vec::new(),
            open_text: None,
            open_reasoning: None,
            extractor,
            gate,
            emitter: TurnEventEmitter::new(request.turn_id, request.event_sink),
            snapshots: request.snapshots,
            compaction: request.compaction,
            cancel: request
                .cancel
                .map(|parent| parent.child_token())
                .unwrap_or_default(),
            tasks: JoinSet::new(),
            outstanding: 0,
            updates_tx,
            updates_rx,
            path_tails: HashMap::new(),
            repeats: HashMap::new(),
            doom_loop_threshold: request
                .doom_loop_threshold
                .unwrap_or(DEFAULT_DOOM_LOOP_THRESHOLD)
                .max(1),
            usage: Usage::default(),
            overflow: false,
            awaiting_approval: false,
            finish: None,
            error: None,
        }
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn awaiting_approval(&self) -> bool {
        self.awaiting_approval
    }

    pub(crate) fn emitter(&self) -> &TurnEventEmitter {
        &self.emitter
    }

    // -----------------------------------------------------------------------
    // Stream input
    // -----------------------------------------------------------------------

    /// Begin streaming; records a step-start part with a snapshot when a store is configured.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != TurnState::Idle {
            return Err(self.wrong_state("start"));
        }
        self.state = TurnState::Streaming;
        self.emitter.emit(TurnEventPayload::Lifecycle {
            state: TurnLifecycle::Started,
        });
        tracing::debug!(turn_id = %self.turn_id, session_id = %self.session_id, "Turn started");
        let snapshot = self.take_snapshot().await;
        self.push_part(PartKind::StepStart(StepStartPart { snapshot }));
        Ok(())
    }

    pub fn on_text_delta(&mut self, delta: &str) -> Result<()> {
        self.ensure_streaming("on_text_delta")?;
        self.poll_tools();
        let events = self.extractor.feed(delta);
        self.apply_events(events);
        Ok(())
    }

    /// Reasoning delivered out of band by the transport.
    pub fn on_reasoning_delta(&mut self, delta: &str) -> Result<()> {
        self.ensure_streaming("on_reasoning_delta")?;
        self.poll_tools();
        if delta.is_empty() {
            return Ok(());
        }
        self.close_text();
        match self.open_reasoning {
            Some(index) => {
                let part = &mut self.parts[index];
                if let Some(text) = part.text_mut() {
                    text.text.push_str(delta);
                }
                self.emitter.emit(TurnEventPayload::ReasoningDelta {
                    part_id: part.id.clone(),
                    text: delta.to_string(),
                });
            }
            None if delta.trim().is_empty() => {}
            None => {
                let index = self.push_part(PartKind::Reasoning(TextPart::new(delta)));
                self.open_reasoning = Some(index);
            }
        }
        Ok(())
    }

    /// Record step usage and ask the compaction hook whether the context overflowed.
    pub fn on_step_finish(&mut self, usage: &Usage) -> Result<()> {
        self.ensure_streaming("on_step_finish")?;
        self.usage.merge(usage);
        if let Some(check) = &self.compaction {
            if check(usage) {
                tracing::debug!(
                    turn_id = %self.turn_id,
                    total_tokens = usage.total_tokens,
                    "Context overflow reported"
                );
                self.overflow = true;
            }
        }
        Ok(())
    }

    /// Flush the extractor, await outstanding tool calls and finish the turn.
    pub async fn on_complete(&mut self, reason: FinishReason) -> Result<TurnOutcome> {
        self.ensure_streaming("on_complete")?;
        self.state = TurnState::Finalizing;
        let tail = self.extractor.finish();
        self.apply_events(tail);
        self.close_open_parts();

        if !self.drain_tools().await {
            return Ok(self.cancel());
        }

        let snapshot = self.take_snapshot().await;
        self.push_part(PartKind::StepFinish(StepFinishPart {
            reason,
            usage: self.usage.clone(),
            snapshot,
        }));
        self.finish = Some(reason);
        self.state = TurnState::Done;
        self.emitter.emit(TurnEventPayload::Lifecycle {
            state: TurnLifecycle::Completed { reason },
        });
        tracing::debug!(
            turn_id = %self.turn_id,
            %reason,
            parts = self.parts.len(),
            "Turn completed"
        );
        Ok(self.outcome())
    }

    /// Upstream failure: unfinished tool calls become `interrupted` and the turn is errored.
    pub fn on_error(&mut self, error: &RikkiError) -> TurnOutcome {
        if self.state.is_terminal() {
            return self.outcome();
        }
        self.stop_tools();
        self.flush_buffered_text();
        self.mark_unfinished(INTERRUPTED);
        self.state = TurnState::Errored;
        self.finish = Some(FinishReason::Error);
        self.error = Some(error.to_string());
        self.emitter.emit(TurnEventPayload::Lifecycle {
            state: TurnLifecycle::Failed {
                error: error.to_string(),
            },
        });
        tracing::debug!(turn_id = %self.turn_id, error = %error, "Turn errored");
        self.outcome()
    }

    /// Stop the turn. Unfinished tool calls become `cancelled`.
    pub fn cancel(&mut self) -> TurnOutcome {
        if self.state.is_terminal() {
            return self.outcome();
        }
        self.stop_tools();
        self.flush_buffered_text();
        self.mark_unfinished(CANCELLED);
        self.state = TurnState::Cancelled;
        self.finish = Some(FinishReason::Cancelled);
        self.emitter.emit(TurnEventPayload::Lifecycle {
            state: TurnLifecycle::Cancelled,
        });
        tracing::debug!(turn_id = %self.turn_id, "Turn cancelled");
        self.outcome()
    }

    /// Before re-opening the stream: buffered partial tags become text and the open text
    /// part is closed. Running tool calls are kept.
    pub fn prepare_retry(&mut self) {
        if self.state != TurnState::Streaming {
            return;
        }
        self.poll_tools();
        self.flush_buffered_text();
    }

    pub fn outcome(&self) -> TurnOutcome {
        let reason = self.finish.unwrap_or(match self.state {
            TurnState::Errored => FinishReason::Error,
            TurnState::Cancelled => FinishReason::Cancelled,
            _ => FinishReason::Unknown,
        });
        let next = match self.state {
            TurnState::Cancelled | TurnState::Errored => NextAction::Stop,
            _ if self.overflow => NextAction::Compact,
            _ if self.awaiting_approval => NextAction::Stop,
            _ if reason.continues_loop() => NextAction::Continue,
            _ => NextAction::Stop,
        };
        TurnOutcome {
            turn_id: self.turn_id,
            state: self.state,
            reason,
            next,
            awaiting_approval: self.awaiting_approval,
            error: self.error.clone(),
            usage: self.usage.clone(),
        }
    }

    pub fn into_turn(self) -> Turn {
        Turn {
            id: self.turn_id,
            session_id: self.session_id,
            message_id: self.message_id,
            workspace_root: self.workspace_root,
            state: self.state,
            finish: self.finish,
            usage: self.usage,
            parts: self.parts,
        }
    }

    // -----------------------------------------------------------------------
    // Parts
    // -----------------------------------------------------------------------

    fn apply_events(&mut self, events: Vec<ExtractEvent>) {
        for event in events {
            match event {
                ExtractEvent::Text(text) => self.append_text(&text),
                ExtractEvent::Reasoning(body) => self.add_reasoning_block(body),
                ExtractEvent::ToolCall(record) => self.dispatch(record),
            }
        }
    }

    fn push_part(&mut self, kind: PartKind) -> usize {
        let part = Part::new(self.session_id.clone(), self.message_id.clone(), kind);
        self.emitter
            .emit(TurnEventPayload::PartAdded { part: part.clone() });
        self.parts.push(part);
        self.parts.len() - 1
    }

    fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.close_reasoning();
        match self.open_text {
            Some(index) => {
                let part = &mut self.parts[index];
                if let Some(open) = part.text_mut() {
                    open.text.push_str(text);
                }
                self.emitter.emit(TurnEventPayload::TextDelta {
                    part_id: part.id.clone(),
                    text: text.to_string(),
                });
            }
            None if text.trim().is_empty() => {}
            None => {
                let index = self.push_part(PartKind::Text(TextPart::new(text)));
                self.open_text = Some(index);
            }
        }
    }

    fn add_reasoning_block(&mut self, body: String) {
        self.close_open_parts();
        if body.trim().is_empty() {
            return;
        }
        let mut block = TextPart::new(body);
        block.close();
        self.push_part(PartKind::Reasoning(block));
    }

    fn close_text(&mut self) {
        if let Some(index) = self.open_text.take() {
            if let Some(text) = self.parts[index].text_mut() {
                text.close();
            }
        }
    }

    fn close_reasoning(&mut self) {
        if let Some(index) = self.open_reasoning.take() {
            if let Some(text) = self.parts[index].text_mut() {
                text.close();
            }
        }
    }

    fn close_open_parts(&mut self) {
        self.close_text();
        self.close_reasoning();
    }

    fn flush_buffered_text(&mut self) {
        let tail = self.extractor.finish();
        for event in tail {
            if let ExtractEvent::Text(text) = event {
                self.append_text(&text);
            }
        }
        self.close_open_parts();
    }

    // -----------------------------------------------------------------------
    // Tool calls
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, record: ToolCallRecord) {
        self.close_open_parts();
        let input = ToolDispatchGate::prepare_input(&record.name, record.arguments());
        self.note_repeat(&record.name, &input);

        let part = ToolPart::new(record.name.clone(), input.clone());
        let call_id = part.call_id.clone();
        let index = self.push_part(PartKind::Tool(part));

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = self
            .gate
            .target_key(&record.name, &input, &self.workspace_root)
            .and_then(|key| self.path_tails.insert(key, done_rx));

        tracing::debug!(
            turn_id = %self.turn_id,
            call_id = %call_id,
            tool = %record.name,
            serialized = previous.is_some(),
            "Dispatching tool call"
        );

        let request = DispatchRequest {
            tool: record.name,
            input,
            session_id: self.session_id.clone(),
            message_id: self.message_id.clone(),
            call_id,
            workspace_root: self.workspace_root.clone(),
        };
        let gate = self.gate.clone();
        let cancel = self.cancel.clone();
        let mut reporter = ToolReporter {
            tx: self.updates_tx.clone(),
            index,
            finished: false,
        };
        self.outstanding += 1;

        self.tasks.spawn(async move {
            if let Some(previous) = previous {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        reporter.finish(Err(CANCELLED.to_string()));
                        return;
                    }
                    _ = previous => {}
                }
            }
            reporter.started();
            let result = gate
                .execute(&request, &cancel)
                .await
                .map_err(|e| failure_message(&e));
            reporter.finish(result);
            drop(done_tx);
        });
    }

    fn note_repeat(&mut self, tool: &str, input: &Value) {
        let count = self
            .repeats
            .entry((tool.to_string(), input.to_string()))
            .or_insert(0);
        *count += 1;
        if *count == self.doom_loop_threshold {
            tracing::warn!(
                turn_id = %self.turn_id,
                session_id = %self.session_id,
                tool,
                repeats = *count,
                "Same tool call repeated with identical input"
            );
            self.emitter.emit(TurnEventPayload::Warning {
                message: format!(
                    "Tool '{tool}' was called {} times with identical input",
                    self.doom_loop_threshold
                ),
            });
        }
    }

    fn poll_tools(&mut self) {
        while let Ok(update) = self.updates_rx.try_recv() {
            self.apply_update(update);
        }
    }

    /// `false` when the turn was cancelled while waiting.
    async fn drain_tools(&mut self) -> bool {
        let cancel = self.cancel.clone();
        while self.outstanding > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                update = self.updates_rx.recv() => match update {
                    Some(update) => self.apply_update(update),
                    None => break,
                },
            }
        }
        true
    }

    fn apply_update(&mut self, update: ToolUpdate) {
        if matches!(update.event, ToolEvent::Finished(_)) {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
        let Some(part) = self.parts.get_mut(update.index) else {
            return;
        };
        let part_id = part.id.clone();
        let Some(tool) = part.as_tool_mut() else {
            return;
        };
        let applied = match update.event {
            ToolEvent::Started => tool.start(),
            ToolEvent::Finished(Ok(completion)) => tool.complete(completion),
            ToolEvent::Finished(Err(message)) => tool.fail(message),
        };
        if let Err(e) = applied {
            tracing::debug!(call_id = %tool.call_id, error = %e, "Ignoring late tool update");
            return;
        }

        let tool = tool.clone();
        if tool.status() == ToolStatus::Error {
            tracing::debug!(
                call_id = %tool.call_id,
                tool = %tool.tool,
                error = tool.state.error.as_deref().unwrap_or_default(),
                "Tool call failed"
            );
        }
        self.emitter.emit(TurnEventPayload::ToolUpdated {
            part_id,
            call_id: tool.call_id.clone(),
            tool: tool.tool.clone(),
            state: tool.state.clone(),
        });

        if tool.status() == ToolStatus::Completed {
            let pending = [
                (META_PENDING_CHANGE, ApprovalKind::FileChange),
                (META_PENDING_COMMAND, ApprovalKind::CommandExecution),
            ]
            .into_iter()
            .find_map(|(key, kind)| {
                tool.state
                    .metadata
                    .get(key)
                    .and_then(Value::as_str)
                    .map(|id| (id.to_string(), kind))
            });
            if let Some((pending_id, kind)) = pending {
                self.awaiting_approval = true;
                self.emitter.emit(TurnEventPayload::ApprovalRequired {
                    call_id: tool.call_id,
                    pending_id,
                    kind,
                    metadata: tool.state.metadata,
                });
            }
        }
    }

    /// Records updates from calls that already finished, then aborts the rest.
    fn stop_tools(&mut self) {
        self.poll_tools();
        self.cancel.cancel();
        self.tasks.abort_all();
        self.outstanding = 0;
        self.path_tails.clear();
    }

    fn mark_unfinished(&mut self, message: &str) {
        for part in &mut self.parts {
            let part_id = part.id.clone();
            let Some(tool) = part.as_tool_mut() else {
                continue;
            };
            if tool.status().is_terminal() || tool.fail(message).is_err() {
                continue;
            }
            self.emitter.emit(TurnEventPayload::ToolUpdated {
                part_id,
                call_id: tool.call_id.clone(),
                tool: tool.tool.clone(),
                state: tool.state.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn take_snapshot(&mut self) -> Option<String> {
        let store = self.snapshots.as_ref()?;
        match store.take(&self.workspace_root).await {
            Ok(handle) => Some(handle.0),
            Err(e) => {
                tracing::warn!(turn_id = %self.turn_id, error = %e, "Snapshot failed");
                None
            }
        }
    }

    fn ensure_streaming(&self, operation: &str) -> Result<()> {
        if self.state == TurnState::Streaming {
            Ok(())
        } else {
            Err(self.wrong_state(operation))
        }
    }

    fn wrong_state(&self, operation: &str) -> RikkiError {
        RikkiError::InvalidState(format!(
            "{operation} called on turn {} in state {:?}",
            self.turn_id, self.state
        ))
    }
}
