//! Source of stream deltas for a turn.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Result, RikkiError};
use crate::types::TextStreamDelta;

/// Stream of deltas for one attempt.
pub type DeltaStream = BoxStream<'static, Result<TextStreamDelta>>;

/// Opens the model stream for a turn. Called again for each retry.
#[async_trait]
pub trait TurnTransport: Send + Sync {
    /// `attempt` starts at 1.
    async fn open(&self, attempt: u32) -> Result<DeltaStream>;
}

/// Transport fed by an mpsc channel from a producer task. Opens once.
pub struct ChannelTransport {
    rx: Mutex<Option<mpsc::Receiver<Result<TextStreamDelta>>>>,
}

impl ChannelTransport {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<Result<TextStreamDelta>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl TurnTransport for ChannelTransport {
    async fn open(&self, attempt: u32) -> Result<DeltaStream> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                RikkiError::transport(format!(
                    "channel transport cannot be reopened (attempt {attempt})"
                ))
            })?;
        Ok(ReceiverStream::new(rx).boxed())
    }
}
