//! Streaming chat-completion protocol for Llama-style inference
//!
//! Canonical request and event types, the tool-call parser, the streaming
//! aggregator, the raw-output decoder, and the provider boundary with its
//! lifecycle handle and registry.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod aggregator;
pub mod convert;
pub mod decoder;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod tool_parser;
pub mod types;

pub use aggregator::{StreamAggregator, aggregate, aggregate_stream};
pub use error::InferenceError;
pub use handle::{ProviderHandle, ProviderState};
pub use provider::{Provider, ProviderCapabilities};
pub use registry::{ProviderRegistry, ResolvedModel};
pub use stream::{ChunkStream, EventStream};
pub use types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponseEvent, CompletionMessage, Message};
