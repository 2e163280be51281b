//! Reassembles a streamed response into one completion message

use futures_util::{Stream, StreamExt};

use crate::error::InferenceError;
use crate::tool_parser::{extract_function_tags, parse_tool_calls};
use crate::types::{
    ChatCompletionResponseEvent, ChatCompletionResponseEventType, CompletionMessage, EventDelta, StopReason, ToolCall,
    ToolCallDelta, ToolCallDeltaContent, ToolCallParseStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingStart,
    Streaming,
    Complete,
}

/// Folds the events of one turn into a `CompletionMessage`
///
/// Events are pushed in arrival order; `finish` is called once the stream
/// ends. The aggregator enforces the start/progress/complete contract and
/// never returns a partially parsed tool call.
#[derive(Debug)]
pub struct StreamAggregator {
    phase: Phase,
    content: String,
    tool_calls: Vec<ToolCall>,
    // Resolved calls not yet matched against tool-call text
    uncovered: Vec<ToolCall>,
    pending: String,
    stop_reason: Option<StopReason>,
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAggregator {
    /// Empty aggregator waiting for a start event
    pub const fn new() -> Self {
        Self {
            phase: Phase::AwaitingStart,
            content: String::new(),
            tool_calls: Vec::new(),
            uncovered: Vec::new(),
            pending: String::new(),
            stop_reason: None,
        }
    }

    /// Apply the next event of the stream
    ///
    /// # Errors
    ///
    /// Returns `Protocol` on ordering violations and `MalformedToolCall` when
    /// tool-call text fails to parse
    pub fn push(&mut self, event: ChatCompletionResponseEvent) -> Result<(), InferenceError> {
        match (self.phase, event.event_type) {
            (Phase::AwaitingStart, ChatCompletionResponseEventType::Start) => {
                self.phase = Phase::Streaming;
                return self.apply_delta(event.delta);
            }
            (Phase::AwaitingStart, other) => {
                return Err(InferenceError::Protocol(format!("{other} event before start")));
            }
            (Phase::Complete, other) => {
                return Err(InferenceError::Protocol(format!("{other} event after complete")));
            }
            (Phase::Streaming, ChatCompletionResponseEventType::Start) => {
                return Err(InferenceError::Protocol("duplicate start event".to_owned()));
            }
            (Phase::Streaming, _) => {}
        }

        let completes = event.event_type == ChatCompletionResponseEventType::Complete;

        if completes && event.stop_reason.is_none() {
            return Err(InferenceError::Protocol("complete event without stop_reason".to_owned()));
        }

        self.apply_delta(event.delta)?;

        if let Some(stop_reason) = event.stop_reason {
            self.resolve_pending()?;
            self.stop_reason = Some(stop_reason);
        }

        if completes {
            self.phase = Phase::Complete;
        }

        Ok(())
    }

    /// Produce the completed message
    ///
    /// # Errors
    ///
    /// Returns `StreamCanceled` if no complete event was seen and
    /// `MalformedToolCall` if a function tag in the text cannot be parsed
    pub fn finish(mut self) -> Result<CompletionMessage, InferenceError> {
        let (Phase::Complete, Some(stop_reason)) = (self.phase, self.stop_reason) else {
            return Err(InferenceError::StreamCanceled);
        };

        let (mut content, embedded) = extract_function_tags(&self.content)?;
        for call in embedded {
            self.push_parsed(call);
        }

        if !self.tool_calls.is_empty() {
            content.truncate(content.trim_end().len());
        }

        Ok(CompletionMessage {
            content,
            stop_reason,
            tool_calls: self.tool_calls,
        })
    }

    fn apply_delta(&mut self, delta: EventDelta) -> Result<(), InferenceError> {
        match delta {
            EventDelta::Text(text) => self.content.push_str(&text),
            EventDelta::ToolCall(delta) => self.apply_tool_call(delta)?,
        }

        Ok(())
    }

    fn apply_tool_call(&mut self, delta: ToolCallDelta) -> Result<(), InferenceError> {
        match (delta.parse_status, delta.content) {
            (ToolCallParseStatus::Failure, content) => {
                let mut raw = std::mem::take(&mut self.pending);
                if let ToolCallDeltaContent::Text(text) = content {
                    raw.push_str(&text);
                }
                Err(InferenceError::malformed(raw, "model output could not be parsed as a tool call"))
            }
            (ToolCallParseStatus::Success, ToolCallDeltaContent::ToolCall(call)) => {
                self.pending.clear();
                self.push_resolved(call);
                Ok(())
            }
            (ToolCallParseStatus::Success, ToolCallDeltaContent::Text(text)) => {
                self.pending.push_str(&text);
                self.resolve_pending()
            }
            (_, ToolCallDeltaContent::Text(text)) => {
                self.pending.push_str(&text);
                Ok(())
            }
            (_, ToolCallDeltaContent::ToolCall(call)) => {
                self.push_resolved(call);
                Ok(())
            }
        }
    }

    fn resolve_pending(&mut self) -> Result<(), InferenceError> {
        let pending = std::mem::take(&mut self.pending);
        if pending.trim().is_empty() {
            return Ok(());
        }

        for call in parse_tool_calls(&pending)? {
            self.push_parsed(call);
        }

        Ok(())
    }

    /// Record a call delivered by a `success` delta
    ///
    /// Distinct resolved calls are all kept, even when they invoke the same
    /// tool with the same arguments; only a repeated `call_id` is dropped.
    fn push_resolved(&mut self, call: ToolCall) {
        if self.tool_calls.iter().any(|existing| existing.call_id == call.call_id) {
            return;
        }
        self.uncovered.push(call.clone());
        self.tool_calls.push(call);
    }

    /// Record a call parsed from tool-call text
    ///
    /// Text that restates an already resolved call consumes that call
    /// instead of adding a duplicate.
    fn push_parsed(&mut self, call: ToolCall) {
        if let Some(index) = self.uncovered.iter().position(|resolved| resolved.same_invocation(&call)) {
            self.uncovered.remove(index);
            return;
        }
        self.tool_calls.push(call);
    }
}

/// Aggregate an in-memory event sequence
///
/// # Errors
///
/// See [`StreamAggregator::push`] and [`StreamAggregator::finish`]
pub fn aggregate<I>(events: I) -> Result<CompletionMessage, InferenceError>
where
    I: IntoIterator<Item = ChatCompletionResponseEvent>,
{
    let mut aggregator = StreamAggregator::new();
    for event in events {
        aggregator.push(event)?;
    }
    aggregator.finish()
}

/// Drain an event stream and aggregate it
///
/// The first error yielded by the stream is returned as is.
///
/// # Errors
///
/// See [`StreamAggregator::push`] and [`StreamAggregator::finish`]
pub async fn aggregate_stream<S>(events: S) -> Result<CompletionMessage, InferenceError>
where
    S: Stream<Item = Result<ChatCompletionResponseEvent, InferenceError>>,
{
    let mut events = std::pin::pin!(events);
    let mut aggregator = StreamAggregator::new();

    while let Some(event) = events.next().await {
        aggregator.push(event?)?;
    }

    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArgumentValue, BuiltinTool, ToolArguments, ToolName};

    fn brave_search_call() -> ToolCall {
        let mut arguments = ToolArguments::new();
        arguments.insert("query".to_owned(), "current US President".into());
        ToolCall::new(BuiltinTool::BraveSearch, arguments)
    }

    #[test]
    fn concatenates_text() {
        let message = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::text("The capital of France"),
            ChatCompletionResponseEvent::text(" is Paris."),
            ChatCompletionResponseEvent::complete(StopReason::EndOfTurn),
        ])
        .unwrap();

        assert_eq!(message.content, "The capital of France is Paris.");
        assert_eq!(message.stop_reason, StopReason::EndOfTurn);
        assert!(message.tool_calls.is_empty());
    }

    #[test]
    fn builtin_call_arrives_atomically() {
        let call = brave_search_call();
        let message = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text("", ToolCallParseStatus::Started),
                None,
            ),
            ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text("brave_search.call(query=\"current US President\")", ToolCallParseStatus::InProgress),
                None,
            ),
            ChatCompletionResponseEvent::tool_call(ToolCallDelta::resolved(call.clone()), Some(StopReason::EndOfMessage)),
            ChatCompletionResponseEvent::complete(StopReason::EndOfMessage),
        ])
        .unwrap();

        assert_eq!(message.content, "");
        assert_eq!(message.stop_reason, StopReason::EndOfMessage);
        assert_eq!(message.tool_calls, vec![call]);
    }

    #[test]
    fn fragments_are_parsed_on_stop() {
        let message = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text("<function=get_boiling_point>{\"liquid", ToolCallParseStatus::Started),
                None,
            ),
            ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text("_name\": \"polyjuice\"}</function>", ToolCallParseStatus::InProgress),
                Some(StopReason::EndOfTurn),
            ),
            ChatCompletionResponseEvent::complete(StopReason::EndOfTurn),
        ])
        .unwrap();

        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].tool_name, ToolName::Custom("get_boiling_point".to_owned()));
        assert_eq!(
            message.tool_calls[0].arguments["liquid_name"],
            ArgumentValue::String("polyjuice".to_owned())
        );
    }

    #[test]
    fn embedded_function_tag_is_extracted_once() {
        let tag = "<function=get_boiling_point>{\"liquid_name\": \"polyjuice\"}</function>";
        let resolved = crate::tool_parser::parse_function_tag(tag).unwrap();

        let message = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::text("Checking. "),
            ChatCompletionResponseEvent::text(tag),
            ChatCompletionResponseEvent::tool_call(ToolCallDelta::resolved(resolved), Some(StopReason::EndOfTurn)),
            ChatCompletionResponseEvent::complete(StopReason::EndOfTurn),
        ])
        .unwrap();

        assert_eq!(message.content, "Checking.");
        assert_eq!(message.tool_calls.len(), 1);
    }

    #[test]
    fn identical_parallel_calls_are_kept() {
        let mut arguments = ToolArguments::new();
        arguments.insert("city".to_owned(), "Paris".into());

        let mut first = ToolCall::new("get_weather", arguments.clone());
        first.call_id = "call_a".to_owned();
        let mut second = ToolCall::new("get_weather", arguments);
        second.call_id = "call_b".to_owned();

        let message = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::tool_call(ToolCallDelta::resolved(first.clone()), None),
            ChatCompletionResponseEvent::tool_call(ToolCallDelta::resolved(second), Some(StopReason::EndOfMessage)),
            ChatCompletionResponseEvent::tool_call(ToolCallDelta::resolved(first), None),
            ChatCompletionResponseEvent::complete(StopReason::EndOfMessage),
        ])
        .unwrap();

        let ids: Vec<_> = message.tool_calls.iter().map(|call| call.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
    }

    #[test]
    fn function_tags_beyond_resolved_calls_are_kept() {
        let tag = "<function=get_boiling_point>{\"liquid_name\": \"polyjuice\"}</function>";
        let resolved = crate::tool_parser::parse_function_tag(tag).unwrap();

        let message = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::text(format!("{tag}{tag}")),
            ChatCompletionResponseEvent::tool_call(ToolCallDelta::resolved(resolved), Some(StopReason::EndOfTurn)),
            ChatCompletionResponseEvent::complete(StopReason::EndOfTurn),
        ])
        .unwrap();

        assert_eq!(message.content, "");
        assert_eq!(message.tool_calls.len(), 2);
    }

    #[test]
    fn failure_delta_is_malformed() {
        let err = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text("<function=get_boiling_point>{oops", ToolCallParseStatus::Started),
                None,
            ),
            ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text("", ToolCallParseStatus::Failure),
                Some(StopReason::EndOfTurn),
            ),
            ChatCompletionResponseEvent::complete(StopReason::EndOfTurn),
        ])
        .unwrap_err();

        let InferenceError::MalformedToolCall { raw, .. } = err else {
            panic!("expected MalformedToolCall, got {err:?}");
        };
        assert!(raw.contains("{oops"));
    }

    #[test]
    fn unparseable_fragments_are_malformed() {
        let err = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::tool_call(
                ToolCallDelta::text("{\"name\": ", ToolCallParseStatus::Started),
                None,
            ),
            ChatCompletionResponseEvent::complete(StopReason::OutOfTokens),
        ])
        .unwrap_err();

        assert!(matches!(err, InferenceError::MalformedToolCall { .. }));
    }

    #[test]
    fn ordering_violations_are_rejected() {
        let err = aggregate([ChatCompletionResponseEvent::text("hi")]).unwrap_err();
        assert!(matches!(err, InferenceError::Protocol(_)));

        let err = aggregate([ChatCompletionResponseEvent::start(), ChatCompletionResponseEvent::start()]).unwrap_err();
        assert!(matches!(err, InferenceError::Protocol(ref m) if m.contains("duplicate start")));

        let err = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::complete(StopReason::EndOfTurn),
            ChatCompletionResponseEvent::text("late"),
        ])
        .unwrap_err();
        assert!(matches!(err, InferenceError::Protocol(ref m) if m.contains("after complete")));

        let mut complete = ChatCompletionResponseEvent::complete(StopReason::EndOfTurn);
        complete.stop_reason = None;
        let err = aggregate([ChatCompletionResponseEvent::start(), complete]).unwrap_err();
        assert!(matches!(err, InferenceError::Protocol(ref m) if m.contains("without stop_reason")));
    }

    #[test]
    fn truncated_stream_is_canceled() {
        let err = aggregate([
            ChatCompletionResponseEvent::start(),
            ChatCompletionResponseEvent::text("The capital"),
        ])
        .unwrap_err();

        assert!(matches!(err, InferenceError::StreamCanceled));
    }

    #[tokio::test]
    async fn aggregates_async_stream() {
        let events = futures_util::stream::iter([
            Ok(ChatCompletionResponseEvent::start()),
            Ok(ChatCompletionResponseEvent::text("Paris")),
            Ok(ChatCompletionResponseEvent::complete(StopReason::EndOfTurn)),
        ]);

        let message = aggregate_stream(events).await.unwrap();
        assert_eq!(message.content, "Paris");
    }

    #[tokio::test]
    async fn stream_error_is_propagated() {
        let events = futures_util::stream::iter([
            Ok(ChatCompletionResponseEvent::start()),
            Err(InferenceError::Upstream("502 Bad Gateway".to_owned())),
        ]);

        let err = aggregate_stream(events).await.unwrap_err();
        assert!(matches!(err, InferenceError::Upstream(_)));
    }
}
