//! End-to-end turn tests: runner, controller, extractor and gate together.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{gate, EventLog, ScriptedTransport, Step, Workspace};
use rikki::agent_loop::{
    restore_turn_start, ChannelTransport, NextAction, SnapshotHandle, SnapshotStore,
    TurnEventPayload, TurnLifecycle, TurnReport, TurnRequest, TurnRunner, TurnState,
};
use rikki::config::{EngineConfig, ToolConfig};
use rikki::dispatch::ToolDispatchGate;
use rikki::error::Result;
use rikki::pending::PendingRegistry;
use rikki::risk::RiskAssessor;
use rikki::tools::{AgentTool, AgentToolParameters, ToolAction, ToolRegistry};
use rikki::types::{
    FinishReason, Part, PartKind, TextStreamDelta, ToolPart, ToolStatus, Usage,
};

fn runner(registry: Arc<PendingRegistry>) -> TurnRunner {
    TurnRunner::new(gate(registry), EngineConfig::default())
}

fn request(ws: &Workspace, log: &EventLog) -> TurnRequest {
    TurnRequest::builder()
        .session_id("ses_1")
        .workspace_root(ws.root())
        .event_sink(log.sink())
        .build()
}

fn texts(report: &TurnReport) -> Vec<String> {
    report
        .turn
        .parts
        .iter()
        .filter_map(|p| p.as_text().map(|t| t.text.clone()))
        .collect()
}

fn tools(report: &TurnReport) -> Vec<ToolPart> {
    report
        .turn
        .parts
        .iter()
        .filter_map(|p| p.as_tool().cloned())
        .collect()
}

fn kinds(report: &TurnReport) -> Vec<&'static str> {
    report.turn.parts.iter().map(Part::type_name).collect()
}

/// Registry with the built-ins plus a `slow` tool that never finishes.
fn gate_with_slow_tool(registry: Arc<PendingRegistry>) -> Arc<ToolDispatchGate> {
    let mut tools = ToolRegistry::with_builtins();
    tools.register(Arc::new(AgentTool::new(
        "slow",
        "Never finishes",
        AgentToolParameters::empty(),
        |_args, _ctx| async move { std::future::pending::<Result<ToolAction>>().await },
    )));
    Arc::new(
        ToolDispatchGate::new(tools, registry, ToolConfig::default())
            .with_assessor(RiskAssessor::new().with_home(None)),
    )
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pure_text_turn_completes_with_stop() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::start(),
        TextStreamDelta::text("Hello"),
        TextStreamDelta::text(" there."),
        TextStreamDelta::step_finish(Usage {
            input_tokens: 10,
            output_tokens: 4,
            total_tokens: 14,
            ..Usage::default()
        }),
        TextStreamDelta::done(FinishReason::Stop),
    ]);

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    assert_eq!(report.outcome.state, TurnState::Done);
    assert_eq!(report.outcome.reason, FinishReason::Stop);
    assert_eq!(report.outcome.next, NextAction::Stop);
    assert_eq!(report.outcome.usage.total_tokens, 14);
    assert_eq!(texts(&report), vec!["Hello there.".to_string()]);
    assert_eq!(kinds(&report), vec!["step-start", "text", "step-finish"]);
}

#[tokio::test]
async fn tag_split_across_four_deltas_yields_one_edit_call() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let registry = Arc::new(PendingRegistry::new());
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text("Sure, I will create the file.\n<ed"),
        TextStreamDelta::text("it filePath=\"test.txt\" \n"),
        TextStreamDelta::text("newString=\"Hello World\" oldString=\"\">\n"),
        TextStreamDelta::text("</edit>"),
        TextStreamDelta::done(FinishReason::ToolCalls),
    ]);

    let report = runner(registry.clone())
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    let calls = tools(&report);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "edit");
    assert_eq!(calls[0].state.input["filePath"], json!("test.txt"));
    assert_eq!(calls[0].state.input["newString"], json!("Hello World"));
    assert_eq!(calls[0].status(), ToolStatus::Completed);
    assert_eq!(
        texts(&report),
        vec!["Sure, I will create the file.".to_string()]
    );

    // Staged, not written.
    assert_eq!(ws.read("test.txt"), None);
    let staged = registry.get_by_scope("test.txt", &ws.root(), "ses_1").unwrap();
    assert_eq!(staged.new_content.as_deref(), Some("Hello World"));
    assert!(report.outcome.awaiting_approval);
    assert_eq!(report.outcome.next, NextAction::Stop);
}

#[tokio::test]
async fn fenced_tag_like_text_is_a_single_text_part() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let fenced = "Example:\n```xml\n<edit filePath=\"a.txt\" newString=\"x\">\n```";
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text(fenced),
        TextStreamDelta::done(FinishReason::Stop),
    ]);

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    assert!(tools(&report).is_empty());
    assert_eq!(texts(&report), vec![fenced.to_string()]);
}

#[tokio::test]
async fn read_runs_while_streaming_and_the_loop_continues() {
    let ws = Workspace::new();
    ws.write("hello.txt", "hello\nworld\n");
    let log = EventLog::default();
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text("Checking. <read filePath=\"hello.txt\"></read>"),
        TextStreamDelta::text(" Back soon."),
        TextStreamDelta::done(FinishReason::ToolCalls),
    ]);

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    assert_eq!(
        kinds(&report),
        vec!["step-start", "text", "tool", "text", "step-finish"]
    );
    let read = &tools(&report)[0];
    assert_eq!(read.status(), ToolStatus::Completed);
    assert!(read.state.output.as_deref().unwrap().contains("hello"));
    assert_eq!(read.state.title.as_deref(), Some("hello.txt"));
    assert!(!report.outcome.awaiting_approval);
    assert_eq!(report.outcome.next, NextAction::Continue);
}

#[tokio::test]
async fn same_path_calls_apply_in_extraction_order() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let registry = Arc::new(PendingRegistry::new());
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text("<write filePath=\"a.txt\">one</write>"),
        TextStreamDelta::text(
            "<edit filePath=\"./a.txt\" oldString=\"one\" newString=\"two\"></edit>",
        ),
        TextStreamDelta::done(FinishReason::ToolCalls),
    ]);

    let report = runner(registry.clone())
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    let calls = tools(&report);
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.status() == ToolStatus::Completed));
    let changes = registry.list_changes(Some(ws.root().as_str()), Some("ses_1"));
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].new_content.as_deref(), Some("two"));
}

#[tokio::test]
async fn failing_tool_is_recorded_and_turn_continues() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text("<read filePath=\"missing.txt\"></read>"),
        TextStreamDelta::done(FinishReason::ToolCalls),
    ]);

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    let read = &tools(&report)[0];
    assert_eq!(read.status(), ToolStatus::Error);
    assert!(read.state.error.is_some());
    assert_eq!(report.outcome.state, TurnState::Done);
    assert_eq!(report.outcome.next, NextAction::Continue);
}

#[tokio::test]
async fn stream_end_without_finish_signal_is_unknown() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport =
        ScriptedTransport::new().deltas(vec![TextStreamDelta::text("cut off <wri")]);

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    assert_eq!(report.outcome.reason, FinishReason::Unknown);
    assert_eq!(texts(&report), vec!["cut off <wri".to_string()]);
}

#[tokio::test]
async fn repeated_identical_calls_raise_one_warning() {
    let ws = Workspace::new();
    ws.write("a.txt", "x");
    let log = EventLog::default();
    let call = "<read filePath=\"a.txt\"></read>";
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text(call.repeat(4)),
        TextStreamDelta::done(FinishReason::ToolCalls),
    ]);

    runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    let warnings: Vec<String> = log
        .payloads()
        .into_iter()
        .filter_map(|p| match p {
            TurnEventPayload::Warning { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(
        warnings,
        vec!["Tool 'read' was called 3 times with identical input".to_string()]
    );
}

#[tokio::test]
async fn events_are_sequenced_from_start_to_completion() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text("a"),
        TextStreamDelta::text("b"),
        TextStreamDelta::done(FinishReason::Stop),
    ]);

    runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    let seqs = log.seqs();
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
    let payloads = log.payloads();
    assert_eq!(
        payloads.first(),
        Some(&TurnEventPayload::Lifecycle {
            state: TurnLifecycle::Started
        })
    );
    assert_eq!(
        payloads.last(),
        Some(&TurnEventPayload::Lifecycle {
            state: TurnLifecycle::Completed {
                reason: FinishReason::Stop
            }
        })
    );
    assert!(payloads
        .iter()
        .any(|p| matches!(p, TurnEventPayload::TextDelta { text, .. } if text == "b")));
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rate_limited_stream_is_retried_with_backoff() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport = Arc::new(
        ScriptedTransport::new()
            .attempt(vec![
                Step::Delta(TextStreamDelta::text("Hel")),
                Step::Fail("HTTP 429 Too Many Requests".into()),
            ])
            .deltas(vec![
                TextStreamDelta::text("lo"),
                TextStreamDelta::done(FinishReason::Stop),
            ]),
    );

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), transport.clone())
        .await
        .unwrap();

    assert_eq!(transport.opened(), 2);
    assert_eq!(report.outcome.state, TurnState::Done);
    assert_eq!(texts(&report), vec!["Hel".to_string(), "lo".to_string()]);
    let retries: Vec<(u32, u64, Option<String>)> = log
        .payloads()
        .into_iter()
        .filter_map(|p| match p {
            TurnEventPayload::Retry {
                attempt,
                delay_ms,
                reason,
                ..
            } => Some((attempt, delay_ms, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, 2_000, Some("Rate Limited".to_string()))]);
}

#[tokio::test(start_paused = true)]
async fn error_delta_from_overloaded_provider_is_retried() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport = Arc::new(
        ScriptedTransport::new()
            .deltas(vec![TextStreamDelta::error("Provider is overloaded")])
            .deltas(vec![
                TextStreamDelta::text("ok"),
                TextStreamDelta::done(FinishReason::Stop),
            ]),
    );

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request(&ws, &log), transport.clone())
        .await
        .unwrap();

    assert_eq!(transport.opened(), 2);
    assert_eq!(report.outcome.state, TurnState::Done);
}

#[tokio::test(start_paused = true)]
async fn idle_stream_times_out_and_retries() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let mut config = EngineConfig::default();
    config.stream.idle_timeout_ms = Some(1_000);
    let transport = Arc::new(
        ScriptedTransport::new()
            .attempt(vec![Step::Hang])
            .deltas(vec![
                TextStreamDelta::text("finally"),
                TextStreamDelta::done(FinishReason::Stop),
            ]),
    );

    let report = TurnRunner::new(gate(Arc::new(PendingRegistry::new())), config)
        .run(request(&ws, &log), transport.clone())
        .await
        .unwrap();

    assert_eq!(transport.opened(), 2);
    assert_eq!(texts(&report), vec!["finally".to_string()]);
    assert!(log.payloads().iter().any(|p| matches!(
        p,
        TurnEventPayload::Retry { reason: Some(r), .. } if r == "Request Timeout"
    )));
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_max_attempts() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let mut config = EngineConfig::default();
    config.retry.max_attempts = 2;
    let transport = Arc::new(
        ScriptedTransport::new()
            .attempt(vec![Step::Fail("503 Service Unavailable".into())])
            .attempt(vec![Step::Fail("503 Service Unavailable".into())]),
    );

    let report = TurnRunner::new(gate(Arc::new(PendingRegistry::new())), config)
        .run(request(&ws, &log), transport.clone())
        .await
        .unwrap();

    assert_eq!(transport.opened(), 2);
    assert_eq!(report.outcome.state, TurnState::Errored);
    assert_eq!(report.outcome.reason, FinishReason::Error);
}

#[tokio::test]
async fn fatal_error_interrupts_running_tools() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport = ScriptedTransport::new().attempt(vec![
        Step::Delta(TextStreamDelta::text("Working. <slow></slow>")),
        Step::Sleep(Duration::from_millis(20)),
        Step::Fail("invalid api key".into()),
    ]);
    let runner = TurnRunner::new(
        gate_with_slow_tool(Arc::new(PendingRegistry::new())),
        EngineConfig::default(),
    );

    let report = runner
        .run(request(&ws, &log), Arc::new(transport))
        .await
        .unwrap();

    assert_eq!(report.outcome.state, TurnState::Errored);
    assert_eq!(report.outcome.next, NextAction::Stop);
    assert_eq!(
        report.outcome.error.as_deref(),
        Some("Transport error: invalid api key")
    );
    let slow = &tools(&report)[0];
    assert_eq!(slow.status(), ToolStatus::Error);
    assert_eq!(slow.state.error.as_deref(), Some("interrupted"));
    assert_eq!(texts(&report), vec!["Working.".to_string()]);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_stops_the_stream_and_marks_tools_cancelled() {
    let ws = Workspace::new();
    let log = EventLog::default();
    let transport = ScriptedTransport::new().attempt(vec![
        Step::Delta(TextStreamDelta::text("Thinking about it <slow></slow>")),
        Step::Hang,
    ]);
    let runner = TurnRunner::new(
        gate_with_slow_tool(Arc::new(PendingRegistry::new())),
        EngineConfig::default(),
    );

    let handle = runner.start(request(&ws, &log), Arc::new(transport));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle.cancel());
    assert!(!handle.cancel());
    let report = handle.wait().await.unwrap();

    assert_eq!(report.outcome.state, TurnState::Cancelled);
    assert_eq!(report.outcome.reason, FinishReason::Cancelled);
    assert_eq!(report.outcome.next, NextAction::Stop);
    assert_eq!(texts(&report), vec!["Thinking about it".to_string()]);
    let slow = &tools(&report)[0];
    assert_eq!(slow.state.error.as_deref(), Some("cancelled"));
    assert_eq!(
        log.payloads().last(),
        Some(&TurnEventPayload::Lifecycle {
            state: TurnLifecycle::Cancelled
        })
    );
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSnapshots {
    taken: std::sync::Mutex<Vec<String>>,
    restored: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl SnapshotStore for RecordingSnapshots {
    async fn take(&self, _workspace_root: &str) -> Result<SnapshotHandle> {
        let mut taken = self.taken.lock().unwrap();
        let handle = format!("snap-{}", taken.len() + 1);
        taken.push(handle.clone());
        Ok(SnapshotHandle(handle))
    }

    async fn restore(&self, _workspace_root: &str, handle: &SnapshotHandle) -> Result<()> {
        self.restored.lock().unwrap().push(handle.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn snapshots_bracket_the_turn_and_restore_uses_the_first() {
    let ws = Workspace::new();
    let store = Arc::new(RecordingSnapshots::default());
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text("done"),
        TextStreamDelta::done(FinishReason::Stop),
    ]);
    let request = TurnRequest::builder()
        .session_id("ses_1")
        .workspace_root(ws.root())
        .snapshots(store.clone())
        .build();

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request, Arc::new(transport))
        .await
        .unwrap();

    let snapshots: Vec<Option<String>> = report
        .turn
        .parts
        .iter()
        .filter_map(|p| match &p.kind {
            PartKind::StepStart(step) => Some(step.snapshot.clone()),
            PartKind::StepFinish(step) => Some(step.snapshot.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        snapshots,
        vec![Some("snap-1".to_string()), Some("snap-2".to_string())]
    );

    assert!(restore_turn_start(store.as_ref(), &report.turn).await.unwrap());
    assert_eq!(*store.restored.lock().unwrap(), vec!["snap-1".to_string()]);
}

#[tokio::test]
async fn overflowing_usage_asks_for_compaction() {
    let ws = Workspace::new();
    let transport = ScriptedTransport::new().deltas(vec![
        TextStreamDelta::text("<read filePath=\"missing\"></read>"),
        TextStreamDelta::step_finish(Usage {
            total_tokens: 190_000,
            ..Usage::default()
        }),
        TextStreamDelta::done(FinishReason::ToolCalls),
    ]);
    let request = TurnRequest::builder()
        .session_id("ses_1")
        .workspace_root(ws.root())
        .compaction(Arc::new(|usage: &Usage| usage.total_tokens > 128_000))
        .build();

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(request, Arc::new(transport))
        .await
        .unwrap();

    assert_eq!(report.outcome.next, NextAction::Compact);
}

#[tokio::test]
async fn channel_transport_feeds_a_turn() {
    let ws = Workspace::new();
    let (transport, tx) = ChannelTransport::new(8);
    tx.send(Ok(TextStreamDelta::text("from a channel"))).await.unwrap();
    tx.send(Ok(TextStreamDelta::done(FinishReason::Stop)))
        .await
        .unwrap();
    drop(tx);

    let report = runner(Arc::new(PendingRegistry::new()))
        .run(
            TurnRequest::builder()
                .session_id("ses_1")
                .workspace_root(ws.root())
                .build(),
            Arc::new(transport),
        )
        .await
        .unwrap();

    assert_eq!(texts(&report), vec!["from a channel".to_string()]);
    assert_eq!(report.outcome.state, TurnState::Done);
}
