use serde::{Deserialize, Serialize};

use super::event::StopReason;
use super::tool::{ToolCall, ToolName};

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instruction
    System,
    /// User turn
    User,
    /// Model turn
    Assistant,
    /// Result of a tool invocation
    ToolResponse,
}

/// Message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// System instruction
    System(SystemMessage),
    /// User turn
    User(UserMessage),
    /// Earlier model turn, replayed for multi-turn conversations
    Assistant(CompletionMessage),
    /// Result of a tool the model called
    ToolResponse(ToolResponseMessage),
}

impl Message {
    /// System message with text content
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(SystemMessage {
            content: Content::Text(content.into()),
        })
    }

    /// User message with text content
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: Content::Text(content.into()),
        })
    }

    /// Tool response answering the call with `call_id`
    pub fn tool_response(call_id: impl Into<String>, tool_name: impl Into<ToolName>, content: impl Into<String>) -> Self {
        Self::ToolResponse(ToolResponseMessage {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: Content::Text(content.into()),
        })
    }

    /// Role of the author
    pub const fn role(&self) -> Role {
        match self {
            Self::System(_) => Role::System,
            Self::User(_) => Role::User,
            Self::Assistant(_) => Role::Assistant,
            Self::ToolResponse(_) => Role::ToolResponse,
        }
    }

    /// Text content of the message, parts joined
    pub fn text(&self) -> String {
        match self {
            Self::System(m) => m.content.as_text(),
            Self::User(m) => m.content.as_text(),
            Self::Assistant(m) => m.content.clone(),
            Self::ToolResponse(m) => m.content.as_text(),
        }
    }
}

/// System instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Instruction content
    pub content: Content,
}

/// User turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// User content
    pub content: Content,
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponseMessage {
    /// Id of the call this answers
    pub call_id: String,
    /// Tool that produced the result
    pub tool_name: ToolName,
    /// Tool output
    pub content: Content,
}

/// Assistant message reconstructed from a completed turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    /// Prose content, excluding any tool-call syntax
    pub content: String,
    /// Why the turn ended
    pub stop_reason: StopReason,
    /// Tool calls the model made, in emission order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// Message content, either plain text or structured parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Array of content parts (text, images)
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Extract text content, joining parts if necessary
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Individual part within a multipart message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content block
    Text {
        /// The text string
        text: String,
    },
    /// Image reference
    Image {
        /// URL or base64 data URI for the image
        url: String,
    },
}
