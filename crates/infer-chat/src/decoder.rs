//! Llama 3.1 raw-output decoding
//!
//! Local providers produce raw model tokens. [`OutputDecoder`] turns them into
//! the start/progress/complete event protocol: it detects stop tokens, the
//! `<|python_tag|>` built-in tool marker, inline `<function=` tags, and JSON
//! or python-list tool calls, and resolves the tool-call text once the message
//! ends.

use crate::tool_parser::{
    FUNCTION_TAG_OPEN, extract_function_tags, parse_builtin_call, parse_json_call, parse_python_list,
};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponseEvent, StopReason, ToolCallDelta, ToolCallParseStatus,
    ToolPromptFormat,
};

/// End of turn
pub const EOT_ID: &str = "<|eot_id|>";
/// End of message; the turn continues after a tool result
pub const EOM_ID: &str = "<|eom_id|>";
/// Following text is a built-in tool call
pub const PYTHON_TAG: &str = "<|python_tag|>";

/// Split raw output into tokens
///
/// Special tokens (`<|...|>`) stay whole; other text is split into words that
/// keep their leading whitespace.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.starts_with("<|")
            && let Some(close) = rest.find("|>")
        {
            let (token, tail) = rest.split_at(close + 2);
            tokens.push(token);
            rest = tail;
            continue;
        }

        let body_start = rest.len() - rest.trim_start().len();
        let body_len = rest[body_start..]
            .find(char::is_whitespace)
            .unwrap_or(rest.len() - body_start);
        let mut end = body_start + body_len;

        if let Some(special) = rest[..end].find("<|")
            && special > 0
        {
            end = special;
        }

        let (token, tail) = rest.split_at(end);
        tokens.push(token);
        rest = tail;
    }

    tokens
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Python,
    FunctionTag,
    Json,
    PythonList,
}

impl Mode {
    /// First character of a message that is a tool call in this mode
    const fn opener(self) -> Option<char> {
        match self {
            Self::Json => Some('{'),
            Self::PythonList => Some('['),
            Self::Text | Self::Python | Self::FunctionTag => None,
        }
    }
}

/// Incremental decoder for one generated message
#[derive(Debug)]
pub struct OutputDecoder {
    mode: Mode,
    leading_call: Option<Mode>,
    emitted_text: bool,
    holdback: String,
    buffer: String,
    stop_reason: Option<StopReason>,
}

impl OutputDecoder {
    /// Decoder for output whose custom tool calls use `format`
    ///
    /// With `Json` a message starting with `{` is a tool call, with
    /// `PythonList` one starting with `[`. Inline `<function=` tags are
    /// recognised regardless.
    pub const fn new(format: Option<ToolPromptFormat>) -> Self {
        let leading_call = match format {
            Some(ToolPromptFormat::Json) => Some(Mode::Json),
            Some(ToolPromptFormat::PythonList) => Some(Mode::PythonList),
            Some(ToolPromptFormat::FunctionTag) | None => None,
        };
        Self {
            mode: Mode::Text,
            leading_call,
            emitted_text: false,
            holdback: String::new(),
            buffer: String::new(),
            stop_reason: None,
        }
    }

    /// Decoder configured for a request's tools and prompt format
    pub fn for_request(request: &ChatCompletionRequest) -> Self {
        let has_custom_tools = request.tools.iter().any(|tool| !tool.tool_name.is_builtin());
        Self::new(request.effective_tool_prompt_format().filter(|_| has_custom_tools))
    }

    /// Stop reason, once a stop token was seen or `finish` was called
    pub const fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Whether the message has ended
    pub const fn is_done(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Feed one token and return the events it produces
    ///
    /// Tokens after a stop token are ignored.
    pub fn push(&mut self, token: &str) -> Vec<ChatCompletionResponseEvent> {
        if self.is_done() {
            return Vec::new();
        }

        match token {
            EOT_ID => return self.finish(StopReason::EndOfTurn),
            EOM_ID => return self.finish(StopReason::EndOfMessage),
            _ => {}
        }

        let mut events = Vec::new();

        if token == PYTHON_TAG {
            if self.mode == Mode::Text {
                self.flush_text(&mut events);
                self.enter_tool_mode(Mode::Python, String::new(), &mut events);
            }
            return events;
        }

        // Other control tokens carry no content
        if token.starts_with("<|") && token.ends_with("|>") {
            return events;
        }

        if self.mode == Mode::Text {
            self.push_text(token, &mut events);
        } else {
            self.buffer.push_str(token);
            events.push(ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text(token, ToolCallParseStatus::InProgress),
                None,
            ));
        }

        events
    }

    /// End the message and return the closing events
    ///
    /// Resolves any buffered tool-call text into a `success` or `failure`
    /// delta carrying `stop_reason`, then emits the complete event.
    pub fn finish(&mut self, stop_reason: StopReason) -> Vec<ChatCompletionResponseEvent> {
        if self.is_done() {
            return Vec::new();
        }
        self.stop_reason = Some(stop_reason);

        let mut events = Vec::new();
        let buffer = std::mem::take(&mut self.buffer);

        let parsed = match self.mode {
            Mode::Text => {
                self.flush_text(&mut events);
                events.push(ChatCompletionResponseEvent::complete(stop_reason));
                return events;
            }
            Mode::Python => parse_builtin_call(&buffer).map(|call| vec![call]),
            Mode::Json => parse_json_call(&buffer).map(|call| vec![call]),
            Mode::PythonList => parse_python_list(&buffer),
            Mode::FunctionTag => extract_function_tags(&buffer).map(|(prose, calls)| {
                if !prose.trim().is_empty() {
                    events.push(ChatCompletionResponseEvent::text(prose));
                }
                calls
            }),
        };

        match parsed {
            Ok(calls) if !calls.is_empty() => {
                let last = calls.len() - 1;
                for (index, call) in calls.into_iter().enumerate() {
                    tracing::debug!(tool = %call.tool_name, call_id = %call.call_id, "resolved tool call");
                    let stop = (index == last).then_some(stop_reason);
                    events.push(ChatCompletionResponseEvent::tool_call(ToolCallDelta::resolved(call), stop));
                }
            }
            Ok(_) => {
                tracing::warn!(raw = %buffer, "tool call output contained no call");
                events.push(failure(stop_reason));
            }
            Err(e) => {
                tracing::warn!(raw = %buffer, error = %e, "failed to parse tool call");
                events.push(failure(stop_reason));
            }
        }

        events.push(ChatCompletionResponseEvent::complete(stop_reason));
        events
    }

    fn push_text(&mut self, token: &str, events: &mut Vec<ChatCompletionResponseEvent>) {
        self.holdback.push_str(token);

        if let Some(mode) = self.leading_call
            && !self.emitted_text
        {
            let trimmed = self.holdback.trim_start();
            if trimmed.is_empty() {
                return;
            }
            if mode.opener().is_some_and(|opener| trimmed.starts_with(opener)) {
                let buffered = trimmed.to_owned();
                self.holdback.clear();
                self.enter_tool_mode(mode, buffered, events);
                return;
            }
            self.leading_call = None;
        }

        if let Some(tag_start) = self.holdback.find(FUNCTION_TAG_OPEN) {
            let tag = self.holdback.split_off(tag_start);
            self.flush_text(events);
            self.enter_tool_mode(Mode::FunctionTag, tag, events);
            return;
        }

        // Keep any suffix that could still become `<function=`
        let keep = (1..FUNCTION_TAG_OPEN.len())
            .rev()
            .find(|&len| self.holdback.ends_with(&FUNCTION_TAG_OPEN[..len]))
            .unwrap_or(0);

        let held = self.holdback.split_off(self.holdback.len() - keep);
        self.flush_text(events);
        self.holdback = held;
    }

    fn flush_text(&mut self, events: &mut Vec<ChatCompletionResponseEvent>) {
        if self.holdback.is_empty() {
            return;
        }
        self.emitted_text = true;
        events.push(ChatCompletionResponseEvent::text(std::mem::take(&mut self.holdback)));
    }

    fn enter_tool_mode(&mut self, mode: Mode, initial: String, events: &mut Vec<ChatCompletionResponseEvent>) {
        tracing::debug!(mode = ?mode, "switching to tool call output");
        self.mode = mode;
        self.buffer.push_str(&initial);
        events.push(ChatCompletionResponseEvent::tool_call(
            ToolCallDelta::text(initial, ToolCallParseStatus::Started),
            None,
        ));
    }
}

fn failure(stop_reason: StopReason) -> ChatCompletionResponseEvent {
    ChatCompletionResponseEvent::tool_call(
        ToolCallDelta::text(String::new(), ToolCallParseStatus::Failure),
        Some(stop_reason),
    )
}
