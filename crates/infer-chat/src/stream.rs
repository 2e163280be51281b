//! Boxed event streams and the channel-backed stream used by local generation

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::InferenceError;
use crate::types::{ChatCompletionChunk, ChatCompletionResponseEvent};

/// Events of one streamed turn
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionResponseEvent, InferenceError>> + Send>>;

/// Chunks returned to callers of `chat_completion`
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, InferenceError>> + Send>>;

/// Sending half handed to a generation task
pub type EventSender = mpsc::Sender<Result<ChatCompletionResponseEvent, InferenceError>>;

/// Receives events from a background generation task
///
/// Dropping the stream cancels the task's token, so the task stops and
/// releases whatever it holds.
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<ChatCompletionResponseEvent, InferenceError>>,
    _cancel_on_drop: DropGuard,
}

impl GenerationStream {
    /// Create a bounded channel and the stream reading from it
    ///
    /// `cancel` is cancelled when the returned stream is dropped.
    pub fn channel(buffer: usize, cancel: CancellationToken) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        let stream = Self {
            rx,
            _cancel_on_drop: cancel.drop_guard(),
        };
        (tx, stream)
    }
}

impl Stream for GenerationStream {
    type Item = Result<ChatCompletionResponseEvent, InferenceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
