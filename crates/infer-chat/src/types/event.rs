use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::message::CompletionMessage;
use super::tool::ToolCall;

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// Turn is over (`<|eot_id|>`)
    EndOfTurn,
    /// Message is over but the turn continues after a tool result (`<|eom_id|>`)
    EndOfMessage,
    /// Token budget exhausted before a stop token
    OutOfTokens,
    /// Upstream stopped for a reason with no Llama counterpart (e.g. a content filter)
    Other,
}

/// Position of an event in the response stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChatCompletionResponseEventType {
    /// First event of every stream
    Start,
    /// Incremental output
    Progress,
    /// Last event of every stream
    Complete,
}

/// Parse state reported with a tool-call delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolCallParseStatus {
    /// Model switched into tool-call output
    Started,
    /// More tool-call text follows
    InProgress,
    /// Accumulated text could not be parsed
    Failure,
    /// Call resolved
    Success,
}

/// Payload of a tool-call delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallDeltaContent {
    /// Raw tool-call text fragment
    Text(String),
    /// Fully resolved call
    ToolCall(ToolCall),
}

/// Tool-call fragment carried by a progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Fragment or resolved call
    pub content: ToolCallDeltaContent,
    /// Parse state of the call so far
    pub parse_status: ToolCallParseStatus,
}

impl ToolCallDelta {
    /// Raw text fragment with the given status
    pub fn text(text: impl Into<String>, parse_status: ToolCallParseStatus) -> Self {
        Self {
            content: ToolCallDeltaContent::Text(text.into()),
            parse_status,
        }
    }

    /// Resolved call
    pub const fn resolved(call: ToolCall) -> Self {
        Self {
            content: ToolCallDeltaContent::ToolCall(call),
            parse_status: ToolCallParseStatus::Success,
        }
    }

    /// The resolved call, if this delta carries one
    pub const fn tool_call(&self) -> Option<&ToolCall> {
        match &self.content {
            ToolCallDeltaContent::ToolCall(call) => Some(call),
            ToolCallDeltaContent::Text(_) => None,
        }
    }
}

/// Incremental payload of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDelta {
    /// Prose fragment
    Text(String),
    /// Tool-call fragment
    ToolCall(ToolCallDelta),
}

impl EventDelta {
    /// Prose text, if this is a text delta
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::ToolCall(_) => None,
        }
    }

    /// Tool-call fragment, if this is a tool-call delta
    pub const fn as_tool_call(&self) -> Option<&ToolCallDelta> {
        match self {
            Self::ToolCall(delta) => Some(delta),
            Self::Text(_) => None,
        }
    }
}

impl Default for EventDelta {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// One event of a streamed chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponseEvent {
    /// Start, progress, or complete
    pub event_type: ChatCompletionResponseEventType,
    /// Incremental payload
    pub delta: EventDelta,
    /// Set when this event ends the message; mandatory on complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl ChatCompletionResponseEvent {
    /// Opening event
    pub fn start() -> Self {
        Self {
            event_type: ChatCompletionResponseEventType::Start,
            delta: EventDelta::default(),
            stop_reason: None,
        }
    }

    /// Prose fragment
    pub fn text(text: impl Into<String>) -> Self {
        Self::progress(EventDelta::Text(text.into()), None)
    }

    /// Progress event with an arbitrary delta
    pub const fn progress(delta: EventDelta, stop_reason: Option<StopReason>) -> Self {
        Self {
            event_type: ChatCompletionResponseEventType::Progress,
            delta,
            stop_reason,
        }
    }

    /// Progress event carrying a tool-call fragment
    pub const fn tool_call(delta: ToolCallDelta, stop_reason: Option<StopReason>) -> Self {
        Self::progress(EventDelta::ToolCall(delta), stop_reason)
    }

    /// Closing event
    pub fn complete(stop_reason: StopReason) -> Self {
        Self {
            event_type: ChatCompletionResponseEventType::Complete,
            delta: EventDelta::default(),
            stop_reason: Some(stop_reason),
        }
    }
}

/// Streaming response wrapper, one per event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponseStreamChunk {
    /// The wrapped event
    pub event: ChatCompletionResponseEvent,
}

/// Single-shot response wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Aggregated assistant message
    pub completion_message: CompletionMessage,
}

/// Item yielded by a chat completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatCompletionChunk {
    /// One streamed event (`stream = true`)
    Stream(ChatCompletionResponseStreamChunk),
    /// The whole answer (`stream = false`)
    Response(ChatCompletionResponse),
}

impl ChatCompletionChunk {
    /// The streamed event, if this is a stream chunk
    pub const fn event(&self) -> Option<&ChatCompletionResponseEvent> {
        match self {
            Self::Stream(chunk) => Some(&chunk.event),
            Self::Response(_) => None,
        }
    }

    /// The aggregated message, if this is a single-shot response
    pub const fn completion_message(&self) -> Option<&CompletionMessage> {
        match self {
            Self::Response(response) => Some(&response.completion_message),
            Self::Stream(_) => None,
        }
    }
}
