//! Rendering completions to the terminal

use std::io::Write;

use futures_util::StreamExt;
use infer_chat::types::{
    ChatCompletionChunk, ChatCompletionRequest, CompletionMessage, EventDelta, ToolCall, ToolCallParseStatus,
};
use infer_chat::{InferenceError, ProviderRegistry};

/// Run the request and print its output
pub async fn run(registry: &ProviderRegistry, request: ChatCompletionRequest) -> anyhow::Result<()> {
    let mut chunks = registry.chat_completion(request).await?;
    let mut stdout = std::io::stdout().lock();

    while let Some(chunk) = chunks.next().await {
        match chunk? {
            ChatCompletionChunk::Stream(chunk) => {
                let event = chunk.event;
                match &event.delta {
                    EventDelta::Text(text) => write!(stdout, "{text}")?,
                    EventDelta::ToolCall(delta) => match delta.parse_status {
                        ToolCallParseStatus::Success => {
                            if let Some(call) = delta.tool_call() {
                                writeln!(stdout)?;
                                print_tool_call(&mut stdout, call)?;
                            }
                        }
                        ToolCallParseStatus::Failure => {
                            return Err(InferenceError::malformed("", "model emitted an unparseable tool call").into());
                        }
                        ToolCallParseStatus::Started | ToolCallParseStatus::InProgress => {}
                    },
                }

                if let Some(stop_reason) = event.stop_reason {
                    tracing::debug!(event_type = %event.event_type, %stop_reason, "stop reason");
                }
                stdout.flush()?;
            }
            ChatCompletionChunk::Response(response) => print_message(&mut stdout, &response.completion_message)?,
        }
    }

    writeln!(stdout)?;
    Ok(())
}

fn print_message(out: &mut impl Write, message: &CompletionMessage) -> anyhow::Result<()> {
    if !message.content.is_empty() {
        write!(out, "{}", message.content)?;
    }

    for (index, call) in message.tool_calls.iter().enumerate() {
        if index > 0 || !message.content.is_empty() {
            writeln!(out)?;
        }
        print_tool_call(out, call)?;
    }

    tracing::info!(stop_reason = %message.stop_reason, tool_calls = message.tool_calls.len(), "completion finished");
    Ok(())
}

fn print_tool_call(out: &mut impl Write, call: &ToolCall) -> anyhow::Result<()> {
    let arguments = serde_json::to_string(&call.arguments)?;
    write!(out, "[tool call {}] {}({arguments})", call.call_id, call.tool_name)?;
    Ok(())
}
