//! Provider trait and implementations for inference backends

pub mod openai;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use infer_config::ProviderConfig;

use crate::error::InferenceError;
use crate::stream::EventStream;
use crate::types::ChatCompletionRequest;

/// Capabilities advertised by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Whether the provider streams events as they are generated
    pub streaming: bool,
    /// Whether the provider can emit tool calls
    pub tool_calling: bool,
    /// Generations that may run at once; `None` means unbounded
    pub max_concurrent_generations: Option<usize>,
}

/// Trait implemented by each inference backend
///
/// Providers are wrapped in a [`ProviderHandle`](crate::handle::ProviderHandle),
/// which enforces the lifecycle and request validation before calling in.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured provider name
    fn name(&self) -> &str;

    /// Advertised capabilities
    fn capabilities(&self) -> ProviderCapabilities;

    /// Prepare the backend for serving
    async fn initialize(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    /// Release backend resources
    async fn shutdown(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    /// Stream the events of one assistant turn
    ///
    /// The stream opens with a start event and closes with a complete event.
    async fn chat_completion_stream(&self, request: &ChatCompletionRequest) -> Result<EventStream, InferenceError>;
}

/// Build a provider from its configuration entry
///
/// # Errors
///
/// Returns `InferenceError::Configuration` if the entry cannot be turned
/// into a working provider
pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>, InferenceError> {
    match config {
        ProviderConfig::Scripted(scripted) => Ok(Arc::new(scripted::ScriptedProvider::new(name, scripted)?)),
        ProviderConfig::OpenaiCompatible(openai) => Ok(Arc::new(openai::OpenAiProvider::new(name, openai)?)),
    }
}
