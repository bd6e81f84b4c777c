//! Shared test helpers: scripted transport, event log and a scratch workspace.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use rikki::agent_loop::{DeltaStream, TurnEvent, TurnEventPayload, TurnEventSink, TurnTransport};
use rikki::config::ToolConfig;
use rikki::dispatch::ToolDispatchGate;
use rikki::error::{Result, RikkiError};
use rikki::pending::PendingRegistry;
use rikki::risk::RiskAssessor;
use rikki::tools::ToolRegistry;
use rikki::types::TextStreamDelta;

/// One scripted step of a stream attempt.
pub enum Step {
    Delta(TextStreamDelta),
    Fail(String),
    Sleep(Duration),
    Hang,
}

/// A transport that replays one script per attempt.
#[derive(Default)]
pub struct ScriptedTransport {
    attempts: Mutex<VecDeque<Vec<Step>>>,
    opened: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(self, steps: Vec<Step>) -> Self {
        self.attempts.lock().unwrap().push_back(steps);
        self
    }

    /// Shorthand for an attempt made only of deltas.
    pub fn deltas(self, deltas: Vec<TextStreamDelta>) -> Self {
        self.attempt(deltas.into_iter().map(Step::Delta).collect())
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    async fn open(&self, _attempt: u32) -> Result<DeltaStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .attempts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RikkiError::transport("no scripted attempt left"))?;
        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Delta(delta) => yield Ok(delta),
                    Step::Fail(message) => {
                        yield Err(RikkiError::transport(message));
                        return;
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Collects every event a turn emits.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<TurnEvent>>>);

impl EventLog {
    pub fn sink(&self) -> TurnEventSink {
        let events = self.0.clone();
        Arc::new(move |event| events.lock().unwrap().push(event))
    }

    pub fn events(&self) -> Vec<TurnEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<TurnEventPayload> {
        self.events().into_iter().map(|e| e.payload).collect()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.events().iter().map(|e| e.seq).collect()
    }
}

/// A scratch workspace directory.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join(relative)).ok()
    }
}

/// Gate over the built-in tools with home-directory checks disabled.
pub fn gate(registry: Arc<PendingRegistry>) -> Arc<ToolDispatchGate> {
    Arc::new(
        ToolDispatchGate::new(ToolRegistry::with_builtins(), registry, ToolConfig::default())
            .with_assessor(RiskAssessor::new().with_home(None)),
    )
}
