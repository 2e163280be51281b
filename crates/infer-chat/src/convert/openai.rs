//! Conversion between canonical types and `OpenAI` wire format

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::InferenceError;
use crate::protocol::openai::{
    OpenAiContent, OpenAiContentPart, OpenAiFunction, OpenAiFunctionCall, OpenAiImageUrl, OpenAiMessage,
    OpenAiRequest, OpenAiStreamChunk, OpenAiStreamToolCall, OpenAiTool, OpenAiToolCall,
};
use crate::tool_parser::parse_arguments_json;
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponseEvent, Content, ContentPart, Message, StopReason, ToolCall,
    ToolCallDelta, ToolCallParseStatus, ToolDefinition, ToolName,
};

// -- Outbound: canonical types -> OpenAI wire format --

/// Build the upstream request for `upstream_model`
pub fn to_openai_request(request: &ChatCompletionRequest, upstream_model: &str) -> OpenAiRequest {
    let tools = (!request.tools.is_empty()).then(|| request.tools.iter().map(Into::into).collect());

    OpenAiRequest {
        model: upstream_model.to_owned(),
        messages: request.messages.iter().map(Into::into).collect(),
        temperature: request.sampling_params.temperature,
        top_p: request.sampling_params.top_p,
        max_tokens: request.sampling_params.max_tokens,
        stream: Some(true),
        tools,
    }
}

impl From<&Message> for OpenAiMessage {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::System(system) => Self::plain("system", Some((&system.content).into())),
            Message::User(user) => Self::plain("user", Some((&user.content).into())),
            Message::Assistant(completion) => {
                let tool_calls = (!completion.tool_calls.is_empty())
                    .then(|| completion.tool_calls.iter().map(Into::into).collect());
                let content = (!completion.content.is_empty()).then(|| OpenAiContent::Text(completion.content.clone()));

                Self {
                    role: "assistant".to_owned(),
                    content,
                    tool_calls,
                    tool_call_id: None,
                }
            }
            Message::ToolResponse(response) => Self {
                role: "tool".to_owned(),
                content: Some((&response.content).into()),
                tool_calls: None,
                tool_call_id: Some(response.call_id.clone()),
            },
        }
    }
}

impl OpenAiMessage {
    fn plain(role: &str, content: Option<OpenAiContent>) -> Self {
        Self {
            role: role.to_owned(),
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

impl From<&Content> for OpenAiContent {
    fn from(content: &Content) -> Self {
        match content {
            Content::Text(text) => Self::Text(text.clone()),
            Content::Parts(parts) => Self::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => OpenAiContentPart::Text { text: text.clone() },
                        ContentPart::Image { url } => OpenAiContentPart::ImageUrl {
                            image_url: OpenAiImageUrl { url: url.clone() },
                        },
                    })
                    .collect(),
            ),
        }
    }
}

impl From<&ToolCall> for OpenAiToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.call_id.clone(),
            tool_type: "function".to_owned(),
            function: OpenAiFunctionCall {
                name: call.tool_name.as_str().to_owned(),
                arguments: serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_owned()),
            },
        }
    }
}

impl From<&ToolDefinition> for OpenAiTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_owned(),
            function: OpenAiFunction {
                name: tool.tool_name.as_str().to_owned(),
                description: tool.description.clone(),
                parameters: Some(parameters_schema(tool)),
            },
        }
    }
}

/// JSON Schema for a tool's parameters
///
/// Built-in tools declared without parameters take their single string
/// argument.
fn parameters_schema(tool: &ToolDefinition) -> serde_json::Value {
    if let ToolName::Builtin(builtin) = &tool.tool_name
        && tool.parameters.is_empty()
    {
        let param = builtin.primary_parameter();
        return json!({
            "type": "object",
            "properties": { param: { "type": "string" } },
            "required": [param],
        });
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, param) in &tool.parameters {
        let mut schema = serde_json::Map::new();
        schema.insert("type".to_owned(), json!(json_schema_type(&param.param_type)));
        if let Some(description) = &param.description {
            schema.insert("description".to_owned(), json!(description));
        }
        if let Some(default) = &param.default {
            schema.insert("default".to_owned(), json!(default));
        }
        properties.insert(name.clone(), serde_json::Value::Object(schema));

        if param.required {
            required.push(name.clone());
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Map a declared parameter type to its JSON Schema name
fn json_schema_type(param_type: &str) -> &str {
    match param_type {
        "str" | "string" => "string",
        "int" | "integer" => "integer",
        "float" | "number" => "number",
        "bool" | "boolean" => "boolean",
        "list" | "array" => "array",
        "dict" | "object" => "object",
        other => other,
    }
}

/// Map an `OpenAI` finish reason to a stop reason
pub fn parse_finish_reason(reason: &str) -> StopReason {
    match reason {
        "tool_calls" | "function_call" => StopReason::EndOfMessage,
        "length" => StopReason::OutOfTokens,
        "stop" => StopReason::EndOfTurn,
        _ => StopReason::Other,
    }
}

// -- Inbound: OpenAI stream -> event protocol --

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Translates `OpenAI` stream chunks into the event protocol
///
/// Tool-call fragments are forwarded as `started` / `in_progress` deltas and
/// resolved into `success` or `failure` deltas once the finish reason
/// arrives.
#[derive(Debug, Default)]
pub struct OpenAiStreamTranslator {
    started: bool,
    completed: bool,
    stop_reason: Option<StopReason>,
    pending: BTreeMap<u32, PendingCall>,
}

impl OpenAiStreamTranslator {
    /// Fresh translator
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening event; emitted once
    pub fn start(&mut self) -> Option<ChatCompletionResponseEvent> {
        if self.started {
            return None;
        }
        self.started = true;
        Some(ChatCompletionResponseEvent::start())
    }

    /// Whether a finish reason has been seen
    pub const fn is_finished(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Whether the complete event has been emitted
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Events for one decoded chunk
    pub fn on_chunk(&mut self, chunk: &OpenAiStreamChunk) -> Vec<ChatCompletionResponseEvent> {
        let mut events: Vec<_> = self.start().into_iter().collect();

        if self.completed {
            return events;
        }

        for choice in chunk.choices.iter().filter(|choice| choice.index == 0) {
            if let Some(content) = &choice.delta.content
                && !content.is_empty()
            {
                events.push(ChatCompletionResponseEvent::text(content.clone()));
            }

            for fragment in choice.delta.tool_calls.iter().flatten() {
                events.push(self.on_tool_call_fragment(fragment));
            }

            if let Some(reason) = &choice.finish_reason
                && self.stop_reason.is_none()
            {
                let stop_reason = parse_finish_reason(reason);
                tracing::debug!(finish_reason = %reason, %stop_reason, "upstream finished");
                self.stop_reason = Some(stop_reason);
                events.extend(self.resolve_pending(stop_reason));
            }
        }

        events
    }

    /// Events for `[DONE]` or the end of the body
    pub fn on_done(&mut self) -> Vec<ChatCompletionResponseEvent> {
        let mut events: Vec<_> = self.start().into_iter().collect();

        if self.completed {
            return events;
        }

        let stop_reason = if let Some(stop_reason) = self.stop_reason {
            stop_reason
        } else {
            tracing::warn!("upstream stream ended without a finish reason");
            let stop_reason = StopReason::EndOfTurn;
            self.stop_reason = Some(stop_reason);
            events.extend(self.resolve_pending(stop_reason));
            stop_reason
        };

        self.completed = true;
        events.push(ChatCompletionResponseEvent::complete(stop_reason));
        events
    }

    fn on_tool_call_fragment(&mut self, fragment: &OpenAiStreamToolCall) -> ChatCompletionResponseEvent {
        let is_new = !self.pending.contains_key(&fragment.index);
        let call = self.pending.entry(fragment.index).or_default();

        if let Some(id) = &fragment.id {
            call.id = Some(id.clone());
        }

        let mut text = String::new();
        if let Some(function) = &fragment.function {
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.arguments.push_str(arguments);
                text.push_str(arguments);
            }
        }

        let status = if is_new {
            ToolCallParseStatus::Started
        } else {
            ToolCallParseStatus::InProgress
        };

        ChatCompletionResponseEvent::tool_call(ToolCallDelta::text(text, status), None)
    }

    fn resolve_pending(&mut self, stop_reason: StopReason) -> Vec<ChatCompletionResponseEvent> {
        let pending = std::mem::take(&mut self.pending);
        let last = pending.len().saturating_sub(1);

        pending
            .into_values()
            .enumerate()
            .map(|(position, call)| {
                let stop = (position == last).then_some(stop_reason);
                let delta = match resolve_call(call) {
                    Ok(call) => ToolCallDelta::resolved(call),
                    Err(e) => {
                        tracing::warn!(error = %e, "upstream tool call could not be parsed");
                        ToolCallDelta::text(String::new(), ToolCallParseStatus::Failure)
                    }
                };
                ChatCompletionResponseEvent::tool_call(delta, stop)
            })
            .collect()
    }
}

fn resolve_call(call: PendingCall) -> Result<ToolCall, InferenceError> {
    let name = call.name.trim();
    if name.is_empty() {
        return Err(InferenceError::malformed(call.arguments, "tool call has no function name"));
    }

    let arguments =
        parse_arguments_json(&call.arguments).map_err(|reason| InferenceError::malformed(&call.arguments, reason))?;

    let mut resolved = ToolCall::new(ToolName::parse(name), arguments);
    if let Some(id) = call.id {
        resolved.call_id = id;
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::protocol::openai::{OpenAiStreamChoice, OpenAiStreamDelta, OpenAiStreamFunctionCall};
    use crate::types::{ArgumentValue, BuiltinTool, CompletionMessage, ToolArguments, ToolParamDefinition};

    fn chunk(delta: OpenAiStreamDelta, finish_reason: Option<&str>) -> OpenAiStreamChunk {
        OpenAiStreamChunk {
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_owned),
            }],
        }
    }

    fn content(text: &str) -> OpenAiStreamDelta {
        OpenAiStreamDelta {
            content: Some(text.to_owned()),
            ..OpenAiStreamDelta::default()
        }
    }

    fn tool_fragment(id: Option<&str>, name: Option<&str>, arguments: &str) -> OpenAiStreamDelta {
        OpenAiStreamDelta {
            tool_calls: Some(vec![OpenAiStreamToolCall {
                index: 0,
                id: id.map(str::to_owned),
                tool_type: id.map(|_| "function".to_owned()),
                function: Some(OpenAiStreamFunctionCall {
                    name: name.map(str::to_owned),
                    arguments: Some(arguments.to_owned()),
                }),
            }]),
            ..OpenAiStreamDelta::default()
        }
    }

    #[test]
    fn finish_reasons_map_to_stop_reasons() {
        assert_eq!(parse_finish_reason("stop"), StopReason::EndOfTurn);
        assert_eq!(parse_finish_reason("tool_calls"), StopReason::EndOfMessage);
        assert_eq!(parse_finish_reason("length"), StopReason::OutOfTokens);
        assert_eq!(parse_finish_reason("content_filter"), StopReason::Other);
        assert_eq!(parse_finish_reason("something_new"), StopReason::Other);
    }

    #[test]
    fn text_stream_translates_to_events() {
        let mut translator = OpenAiStreamTranslator::new();
        let mut events = Vec::new();
        events.extend(translator.on_chunk(&chunk(content("The capital"), None)));
        events.extend(translator.on_chunk(&chunk(content(" is Paris."), Some("stop"))));
        events.extend(translator.on_done());

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ChatCompletionResponseEvent::start());
        assert_eq!(events[3], ChatCompletionResponseEvent::complete(StopReason::EndOfTurn));

        let message = aggregate(events).unwrap();
        assert_eq!(message.content, "The capital is Paris.");
    }

    #[test]
    fn tool_call_fragments_resolve_on_finish() {
        let mut translator = OpenAiStreamTranslator::new();
        let mut events = Vec::new();
        events.extend(translator.on_chunk(&chunk(
            tool_fragment(Some("call_abc"), Some("get_boiling_point"), "{\"liquid_"),
            None,
        )));
        events.extend(translator.on_chunk(&chunk(tool_fragment(None, None, "name\": \"polyjuice\"}"), None)));
        events.extend(translator.on_chunk(&chunk(OpenAiStreamDelta::default(), Some("tool_calls"))));
        events.extend(translator.on_done());

        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| e.delta.as_tool_call().map(|d| d.parse_status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ToolCallParseStatus::Started,
                ToolCallParseStatus::InProgress,
                ToolCallParseStatus::Success
            ]
        );

        let penultimate = &events[events.len() - 2];
        assert_eq!(penultimate.stop_reason, Some(StopReason::EndOfMessage));

        let message = aggregate(events).unwrap();
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].call_id, "call_abc");
        assert_eq!(
            message.tool_calls[0].arguments["liquid_name"],
            ArgumentValue::String("polyjuice".to_owned())
        );
    }

    #[test]
    fn identical_parallel_calls_keep_their_ids() {
        let fragment = |index, id: &str| OpenAiStreamToolCall {
            index,
            id: Some(id.to_owned()),
            tool_type: Some("function".to_owned()),
            function: Some(OpenAiStreamFunctionCall {
                name: Some("get_weather".to_owned()),
                arguments: Some("{\"city\": \"Paris\"}".to_owned()),
            }),
        };

        let mut translator = OpenAiStreamTranslator::new();
        let mut events = translator.on_chunk(&chunk(
            OpenAiStreamDelta {
                tool_calls: Some(vec![fragment(0, "call_a"), fragment(1, "call_b")]),
                ..OpenAiStreamDelta::default()
            },
            None,
        ));
        events.extend(translator.on_chunk(&chunk(OpenAiStreamDelta::default(), Some("tool_calls"))));
        events.extend(translator.on_done());

        let message = aggregate(events).unwrap();
        let ids: Vec<_> = message.tool_calls.iter().map(|call| call.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
    }

    #[test]
    fn broken_arguments_become_failure() {
        let mut translator = OpenAiStreamTranslator::new();
        let mut events = Vec::new();
        events.extend(translator.on_chunk(&chunk(
            tool_fragment(Some("call_abc"), Some("get_boiling_point"), "{\"liquid_name\": "),
            Some("tool_calls"),
        )));
        events.extend(translator.on_done());

        assert!(matches!(aggregate(events), Err(InferenceError::MalformedToolCall { .. })));
    }

    #[test]
    fn done_without_finish_reason_still_completes() {
        let mut translator = OpenAiStreamTranslator::new();
        let mut events = translator.on_chunk(&chunk(content("partial"), None));
        events.extend(translator.on_done());

        assert_eq!(events.last(), Some(&ChatCompletionResponseEvent::complete(StopReason::EndOfTurn)));
        assert!(translator.on_done().is_empty());
    }

    #[test]
    fn request_carries_tools_and_history() {
        let mut arguments = ToolArguments::new();
        arguments.insert("query".to_owned(), "44th president".into());

        let request = ChatCompletionRequest::new(
            "Llama3.1-70B-Instruct",
            vec![
                Message::system("You are a helpful assistant"),
                Message::user("Who was the 44th president?"),
                Message::Assistant(CompletionMessage {
                    content: String::new(),
                    stop_reason: StopReason::EndOfMessage,
                    tool_calls: vec![ToolCall {
                        call_id: "1".to_owned(),
                        tool_name: BuiltinTool::BraveSearch.into(),
                        arguments,
                    }],
                }),
                Message::tool_response("1", BuiltinTool::BraveSearch, "\"Barack Obama\""),
            ],
        )
        .with_tools(vec![
            ToolDefinition::builtin(BuiltinTool::BraveSearch),
            ToolDefinition::custom("get_boiling_point", "Boiling point of a liquid")
                .with_parameter("liquid_name", ToolParamDefinition::new("str"))
                .with_parameter("celcius", ToolParamDefinition::new("bool").optional()),
        ]);

        let wire = to_openai_request(&request, "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo");
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value["model"], "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo");
        assert_eq!(value["stream"], true);

        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "brave_search");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"44th president\"}"
        );
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "1");

        let tools = value["tools"].as_array().unwrap();
        assert_eq!(tools[0]["function"]["parameters"]["required"], json!(["query"]));
        let custom = &tools[1]["function"]["parameters"];
        assert_eq!(custom["properties"]["liquid_name"]["type"], "string");
        assert_eq!(custom["properties"]["celcius"]["type"], "boolean");
        assert_eq!(custom["required"], json!(["liquid_name"]));
    }
}
