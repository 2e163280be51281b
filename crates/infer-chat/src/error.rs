use thiserror::Error;

/// Errors that can occur while serving a chat completion
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Caller sent a malformed or inconsistent request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Tool-call text emitted by the model could not be parsed
    #[error("malformed tool call: {reason}")]
    MalformedToolCall {
        /// Raw text that failed to parse
        raw: String,
        /// Why parsing failed
        reason: String,
    },

    /// Provider was called before `initialize` or after `shutdown`
    #[error("provider '{provider}' is not ready ({state})")]
    ProviderNotReady {
        /// Provider name
        provider: String,
        /// Lifecycle state at the time of the call
        state: &'static str,
    },

    /// Event stream ended before its complete event
    #[error("stream ended before completion")]
    StreamCanceled,

    /// Requested model is not served by any provider
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// Named provider does not exist in configuration
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: String },

    /// Event sequence violated the start/progress/complete contract
    #[error("stream protocol violation: {0}")]
    Protocol(String),

    /// Upstream provider returned an error
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Transport failure while reading a stream
    #[error("streaming error: {0}")]
    Streaming(String),

    /// Local generation could not produce output
    #[error("generation failed: {0}")]
    Generation(String),

    /// Provider could not be built from its configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl InferenceError {
    /// Build a `MalformedToolCall` from the offending text
    pub fn malformed(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedToolCall {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller caused this error
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::ModelNotFound { .. } | Self::ProviderNotFound { .. }
        )
    }
}
