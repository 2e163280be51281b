//! Canonical types for the chat completion protocol
//!
//! Requests, messages, tools, and the start/progress/complete event stream
//! shared by every provider.

pub mod event;
pub mod message;
pub mod request;
pub mod tool;

pub use event::{
    ChatCompletionChunk, ChatCompletionResponse, ChatCompletionResponseEvent, ChatCompletionResponseEventType,
    ChatCompletionResponseStreamChunk, EventDelta, StopReason, ToolCallDelta, ToolCallDeltaContent,
    ToolCallParseStatus,
};
pub use message::{
    CompletionMessage, Content, ContentPart, Message, Role, SystemMessage, ToolResponseMessage, UserMessage,
};
pub use request::{ChatCompletionRequest, SamplingParams};
pub use tool::{
    ArgumentValue, BuiltinTool, ToolArguments, ToolCall, ToolDefinition, ToolName, ToolParamDefinition,
    ToolPromptFormat,
};
