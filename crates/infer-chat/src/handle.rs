//! Lifecycle-aware wrapper around a provider

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::aggregator::aggregate_stream;
use crate::error::InferenceError;
use crate::provider::{Provider, ProviderCapabilities};
use crate::stream::ChunkStream;
use crate::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatCompletionResponseStreamChunk,
    CompletionMessage,
};

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const SHUT_DOWN: u8 = 2;

/// Lifecycle state of a provider handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// Created but not yet initialized
    Uninitialized,
    /// Serving requests
    Ready,
    /// Shut down; terminal
    ShutDown,
}

impl ProviderState {
    const fn from_u8(value: u8) -> Self {
        match value {
            READY => Self::Ready,
            SHUT_DOWN => Self::ShutDown,
            _ => Self::Uninitialized,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::ShutDown => "shut down",
        }
    }
}

/// Shared handle to a provider
///
/// Calls before [`initialize`](Self::initialize) or after
/// [`shutdown`](Self::shutdown) fail with `ProviderNotReady`. Requests are
/// validated before they reach the provider.
#[derive(Clone)]
pub struct ProviderHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    provider: Arc<dyn Provider>,
    state: AtomicU8,
    transition: Mutex<()>,
}

impl ProviderHandle {
    /// Wrap an uninitialized provider
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                provider,
                state: AtomicU8::new(UNINITIALIZED),
                transition: Mutex::new(()),
            }),
        }
    }

    /// Provider name
    pub fn name(&self) -> &str {
        self.inner.provider.name()
    }

    /// Provider capabilities
    pub fn capabilities(&self) -> ProviderCapabilities {
        self.inner.provider.capabilities()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProviderState {
        ProviderState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Initialize the provider; repeated calls are no-ops
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotReady` after shutdown, or the provider's own error
    pub async fn initialize(&self) -> Result<(), InferenceError> {
        let _transition = self.inner.transition.lock().await;

        match self.state() {
            ProviderState::Ready => Ok(()),
            ProviderState::ShutDown => Err(self.not_ready(ProviderState::ShutDown)),
            ProviderState::Uninitialized => {
                self.inner.provider.initialize().await?;
                self.inner.state.store(READY, Ordering::Release);
                tracing::info!(provider = %self.name(), "provider initialized");
                Ok(())
            }
        }
    }

    /// Shut the provider down; the handle rejects all later calls
    ///
    /// # Errors
    ///
    /// Returns the provider's own error; the handle is shut down regardless
    pub async fn shutdown(&self) -> Result<(), InferenceError> {
        let _transition = self.inner.transition.lock().await;

        let previous = ProviderState::from_u8(self.inner.state.swap(SHUT_DOWN, Ordering::AcqRel));
        if previous == ProviderState::ShutDown {
            return Ok(());
        }

        let result = self.inner.provider.shutdown().await;
        tracing::info!(provider = %self.name(), "provider shut down");
        result
    }

    /// Run a chat completion
    ///
    /// With `request.stream` set, every event is yielded as a stream chunk.
    /// Otherwise the stream yields exactly one `ChatCompletionResponse`
    /// carrying the aggregated message.
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotReady`, `InvalidRequest`, or the provider's error
    pub async fn chat_completion(&self, request: ChatCompletionRequest) -> Result<ChunkStream, InferenceError> {
        self.ensure_ready()?;
        request.validate()?;

        tracing::debug!(
            provider = %self.name(),
            model = %request.model,
            stream = request.stream,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion"
        );

        let events = self.inner.provider.chat_completion_stream(&request).await?;

        if request.stream {
            let chunks = events.map(|event| {
                event.map(|event| ChatCompletionChunk::Stream(ChatCompletionResponseStreamChunk { event }))
            });
            return Ok(Box::pin(chunks));
        }

        let response = futures_util::stream::once(async move {
            aggregate_stream(events)
                .await
                .map(|completion_message| ChatCompletionChunk::Response(ChatCompletionResponse { completion_message }))
        });
        Ok(Box::pin(response))
    }

    /// Run a chat completion and return the aggregated message
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotReady`, `InvalidRequest`, the provider's error, or
    /// any aggregation error
    pub async fn complete(&self, request: ChatCompletionRequest) -> Result<CompletionMessage, InferenceError> {
        self.ensure_ready()?;
        request.validate()?;

        let events = self.inner.provider.chat_completion_stream(&request).await?;
        let message = aggregate_stream(events).await?;

        tracing::debug!(
            provider = %self.name(),
            model = %request.model,
            stop_reason = %message.stop_reason,
            tool_calls = message.tool_calls.len(),
            "completion finished"
        );

        Ok(message)
    }

    fn ensure_ready(&self) -> Result<(), InferenceError> {
        match self.state() {
            ProviderState::Ready => Ok(()),
            state => Err(self.not_ready(state)),
        }
    }

    fn not_ready(&self, state: ProviderState) -> InferenceError {
        InferenceError::ProviderNotReady {
            provider: self.name().to_owned(),
            state: state.as_str(),
        }
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
