use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::message::{Message, Role};
use super::tool::{ToolDefinition, ToolPromptFormat};
use crate::error::InferenceError;

/// Parameters controlling token sampling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature (0.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Penalty applied to repeated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
}

/// Chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model identifier, optionally prefixed with `provider/`
    pub model: String,
    /// Conversation so far
    pub messages: Vec<Message>,
    /// Sampling parameters
    #[serde(default)]
    pub sampling_params: SamplingParams,
    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// How custom tools are presented to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prompt_format: Option<ToolPromptFormat>,
    /// Whether to stream events instead of returning one response
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Single-shot request with default sampling and no tools
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            sampling_params: SamplingParams::default(),
            tools: Vec::new(),
            tool_prompt_format: None,
            stream: false,
        }
    }

    /// Enable or disable streaming
    #[must_use]
    pub const fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Offer tools to the model
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the tool prompt format
    #[must_use]
    pub const fn with_tool_prompt_format(mut self, format: ToolPromptFormat) -> Self {
        self.tool_prompt_format = Some(format);
        self
    }

    /// Set the sampling parameters
    #[must_use]
    pub const fn with_sampling_params(mut self, params: SamplingParams) -> Self {
        self.sampling_params = params;
        self
    }

    /// Tool prompt format in effect, defaulting to JSON when tools are present
    pub fn effective_tool_prompt_format(&self) -> Option<ToolPromptFormat> {
        if self.tools.is_empty() {
            None
        } else {
            Some(self.tool_prompt_format.unwrap_or(ToolPromptFormat::Json))
        }
    }

    /// Check the request before handing it to a provider
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::InvalidRequest` describing the first problem found
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.model.trim().is_empty() {
            return Err(invalid("model must not be empty"));
        }

        self.validate_messages()?;
        self.validate_tools()?;
        self.validate_sampling()?;

        Ok(())
    }

    fn validate_messages(&self) -> Result<(), InferenceError> {
        let Some(last) = self.messages.last() else {
            return Err(invalid("messages must not be empty"));
        };

        if !matches!(last.role(), Role::User | Role::ToolResponse) {
            return Err(invalid(format!(
                "conversation must end with a user or tool_response message, found {:?}",
                last.role()
            )));
        }

        let mut issued: HashSet<&str> = HashSet::new();

        for (index, message) in self.messages.iter().enumerate() {
            match message {
                Message::Assistant(completion) => {
                    issued.extend(completion.tool_calls.iter().map(|call| call.call_id.as_str()));
                }
                Message::ToolResponse(response) if !issued.contains(response.call_id.as_str()) => {
                    return Err(invalid(format!(
                        "message {index}: tool response references unknown call_id '{}'",
                        response.call_id
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn validate_tools(&self) -> Result<(), InferenceError> {
        if self.tools.is_empty() {
            if let Some(format) = self.tool_prompt_format {
                return Err(invalid(format!("tool_prompt_format '{format}' requires at least one tool")));
            }
            return Ok(());
        }

        let mut names = HashSet::new();

        for tool in &self.tools {
            let name = tool.tool_name.as_str();

            if name.trim().is_empty() {
                return Err(invalid("tool name must not be empty"));
            }

            if !names.insert(name) {
                return Err(invalid(format!("duplicate tool name '{name}'")));
            }

            if tool.parameters.keys().any(|param| param.trim().is_empty()) {
                return Err(invalid(format!("tool '{name}' has a parameter with an empty name")));
            }
        }

        Ok(())
    }

    fn validate_sampling(&self) -> Result<(), InferenceError> {
        let params = &self.sampling_params;

        if let Some(temperature) = params.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(invalid(format!("temperature {temperature} is outside [0, 2]")));
        }

        if let Some(top_p) = params.top_p
            && !(top_p > 0.0 && top_p <= 1.0)
        {
            return Err(invalid(format!("top_p {top_p} is outside (0, 1]")));
        }

        if params.max_tokens == Some(0) {
            return Err(invalid("max_tokens must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> InferenceError {
    InferenceError::InvalidRequest(message.into())
}
