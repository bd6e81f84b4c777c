//! Runner: drives a [`TurnController`] from a transport stream.

use std::sync::Arc;

use futures::future::OptionFuture;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dispatch::ToolDispatchGate;
use crate::error::{Result, RikkiError};
use crate::types::{FinishReason, StreamEventType, TextStreamDelta};
use crate::util::retry::RetryPolicy;

use super::controller::{TurnController, TurnRequest};
use super::events::TurnEventPayload;
use super::transport::{DeltaStream, TurnTransport};
use super::types::{Turn, TurnId, TurnOutcome};

/// Final state of a finished turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub turn: Turn,
}

/// Handle for an in-flight turn.
#[derive(Debug)]
pub struct TurnHandle {
    turn_id: TurnId,
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<TurnReport>,
}

impl TurnHandle {
    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    /// Request cancellation. Returns `false` if already requested.
    pub fn cancel(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub async fn wait(self) -> Result<TurnReport> {
        self.result_rx.await.map_err(|_| RikkiError::Cancelled)
    }
}

/// How one pass over the stream ended.
enum StreamEnd {
    Complete(FinishReason),
    Cancelled,
    Failed(RikkiError),
}

/// Runs turns on the tokio runtime.
#[derive(Debug, Clone)]
pub struct TurnRunner {
    gate: Arc<ToolDispatchGate>,
    config: EngineConfig,
}

impl TurnRunner {
    pub fn new(gate: Arc<ToolDispatchGate>, config: EngineConfig) -> Self {
        Self { gate, config }
    }

    pub fn gate(&self) -> &Arc<ToolDispatchGate> {
        &self.gate
    }

    /// Spawn the turn. Must be called within a tokio runtime.
    pub fn start(&self, mut request: TurnRequest, transport: Arc<dyn TurnTransport>) -> TurnHandle {
        let cancel = request.cancel.take().unwrap_or_default();
        request.cancel = Some(cancel.clone());
        if request.doom_loop_threshold.is_none() {
            request.doom_loop_threshold = Some(self.config.turn.doom_loop_threshold);
        }

        let turn_id = request.turn_id;
        let (result_tx, result_rx) = oneshot::channel();
        let controller = TurnController::new(request, self.gate.clone());
        let policy = self.config.retry.policy();
        let idle_timeout_ms = self.config.stream.idle_timeout_ms.filter(|ms| *ms > 0);
        let token = cancel.clone();

        tokio::spawn(async move {
            let report = drive(controller, transport, policy, idle_timeout_ms, token).await;
            let _ = result_tx.send(report);
        });

        TurnHandle {
            turn_id,
            cancel,
            result_rx,
        }
    }

    /// Start the turn and wait for its report.
    pub async fn run(
        &self,
        request: TurnRequest,
        transport: Arc<dyn TurnTransport>,
    ) -> Result<TurnReport> {
        self.start(request, transport).wait().await
    }
}

async fn drive(
    mut controller: TurnController,
    transport: Arc<dyn TurnTransport>,
    policy: RetryPolicy,
    idle_timeout_ms: Option<u64>,
    cancel: CancellationToken,
) -> TurnReport {
    if let Err(e) = controller.start().await {
        let outcome = controller.on_error(&e);
        return report(controller, outcome);
    }

    let mut attempt: u32 = 1;
    let outcome = loop {
        let end = match open(&*transport, attempt, &cancel).await {
            Ok(Some(stream)) => consume(&mut controller, stream, idle_timeout_ms, &cancel).await,
            Ok(None) => StreamEnd::Cancelled,
            Err(e) => StreamEnd::Failed(e),
        };

        let error = match end {
            StreamEnd::Complete(reason) => match controller.on_complete(reason).await {
                Ok(outcome) => break outcome,
                Err(e) => break controller.on_error(&e),
            },
            StreamEnd::Cancelled => break controller.cancel(),
            StreamEnd::Failed(e) => e,
        };

        let decision = policy.decide(attempt, &error);
        if !decision.retryable {
            tracing::debug!(
                turn_id = %controller.turn_id(),
                attempt,
                error = %error,
                "Turn failed"
            );
            break controller.on_error(&error);
        }

        controller.prepare_retry();
        controller.emitter().emit(TurnEventPayload::Retry {
            attempt,
            delay_ms: decision.delay_millis,
            reason: decision.reason_label.clone(),
            error: error.to_string(),
        });
        tracing::warn!(
            turn_id = %controller.turn_id(),
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = decision.delay_millis,
            reason = decision.reason_label.as_deref().unwrap_or_default(),
            error = %error,
            "Retrying turn stream"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break controller.cancel(),
            _ = time::sleep(Duration::from_millis(decision.delay_millis)) => {}
        }
        attempt += 1;
    };

    report(controller, outcome)
}

/// `Ok(None)` when cancelled while connecting.
async fn open(
    transport: &dyn TurnTransport,
    attempt: u32,
    cancel: &CancellationToken,
) -> Result<Option<DeltaStream>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        stream = transport.open(attempt) => stream.map(Some),
    }
}

async fn consume(
    controller: &mut TurnController,
    mut stream: DeltaStream,
    idle_timeout_ms: Option<u64>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let mut idle_sleep =
        idle_timeout_ms.map(|ms| Box::pin(time::sleep(Duration::from_millis(ms))));
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            _ = OptionFuture::from(idle_sleep.as_mut()), if idle_sleep.is_some() => {
                return StreamEnd::Failed(RikkiError::Timeout(idle_timeout_ms.unwrap_or_default()));
            }
            delta = stream.next() => {
                let Some(delta) = delta else {
                    tracing::debug!(
                        turn_id = %controller.turn_id(),
                        "Stream ended without a finish signal"
                    );
                    return StreamEnd::Complete(FinishReason::Unknown);
                };
                let delta = match delta {
                    Ok(delta) => delta,
                    Err(e) => return StreamEnd::Failed(e),
                };
                if let (Some(sleep), Some(ms)) = (idle_sleep.as_mut(), idle_timeout_ms) {
                    sleep.as_mut().reset(time::Instant::now() + Duration::from_millis(ms));
                }
                match apply_delta(controller, delta) {
                    Ok(Some(reason)) => return StreamEnd::Complete(reason),
                    Ok(None) => {}
                    Err(e) => return StreamEnd::Failed(e),
                }
            }
        }
    }
}

/// Feed one delta; `Some` once the stream signals completion.
fn apply_delta(
    controller: &mut TurnController,
    delta: TextStreamDelta,
) -> Result<Option<FinishReason>> {
    match delta.event_type {
        StreamEventType::Start => {}
        StreamEventType::TextDelta => controller.on_text_delta(&delta.text)?,
        StreamEventType::ReasoningDelta => controller.on_reasoning_delta(&delta.text)?,
        StreamEventType::StepFinish => {
            if let Some(usage) = &delta.usage {
                controller.on_step_finish(usage)?;
            }
        }
        StreamEventType::Done => {
            if let Some(usage) = &delta.usage {
                controller.on_step_finish(usage)?;
            }
            return Ok(Some(delta.finish_reason.unwrap_or(FinishReason::Unknown)));
        }
        StreamEventType::Error => return Err(RikkiError::transport(delta.text)),
    }
    Ok(None)
}

fn report(controller: TurnController, outcome: TurnOutcome) -> TurnReport {
    TurnReport {
        outcome,
        turn: controller.into_turn(),
    }
}
