//! Local provider replaying scripted raw model output
//!
//! Stands in for a single on-host model instance: each rule maps a pattern
//! over the last message to raw Llama 3.1 output, which is tokenized and run
//! through the [`OutputDecoder`] exactly as real model tokens would be.
//! Generations share one semaphore, so at most `max_concurrent_generations`
//! run at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use infer_config::ScriptedProviderConfig;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{Provider, ProviderCapabilities};
use crate::decoder::{EOM_ID, EOT_ID, OutputDecoder, tokenize};
use crate::error::InferenceError;
use crate::stream::{EventSender, EventStream, GenerationStream};
use crate::types::{ChatCompletionRequest, ChatCompletionResponseEvent, Message, StopReason};

const CHANNEL_CAPACITY: usize = 64;

/// Scripted local provider
pub struct ScriptedProvider {
    name: String,
    rules: Vec<(Regex, String)>,
    fallback: Option<String>,
    max_tokens: u32,
    token_delay: Option<Duration>,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
}

impl ScriptedProvider {
    /// Create from provider configuration
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::Configuration` if a pattern is not a valid
    /// regex or the concurrency limit is zero
    pub fn new(name: impl Into<String>, config: &ScriptedProviderConfig) -> Result<Self, InferenceError> {
        let name = name.into();

        let rules = config
            .scripts
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| (regex, rule.output.clone()))
                    .map_err(|e| {
                        InferenceError::Configuration(format!(
                            "provider '{name}': invalid script pattern '{}': {e}",
                            rule.pattern
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if config.max_concurrent_generations == 0 {
            return Err(InferenceError::Configuration(format!(
                "provider '{name}': max_concurrent_generations must be greater than 0"
            )));
        }

        Ok(Self {
            rules,
            fallback: config.fallback.clone(),
            max_tokens: config.max_tokens,
            token_delay: config.token_delay_ms.map(Duration::from_millis),
            max_concurrent: config.max_concurrent_generations,
            permits: Arc::new(Semaphore::new(config.max_concurrent_generations)),
            name,
        })
    }

    /// Number of generations currently holding a permit
    pub fn active_generations(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Raw output for the conversation, terminated by a stop token
    fn script_for(&self, request: &ChatCompletionRequest) -> Result<String, InferenceError> {
        let prompt = request.messages.last().map(Message::text).unwrap_or_default();

        let output = self
            .rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(&prompt))
            .map(|(_, output)| output)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                InferenceError::Generation(format!("provider '{}': no script matches the last message", self.name))
            })?;

        let mut output = output.clone();
        if !output.contains(EOT_ID) && !output.contains(EOM_ID) {
            output.push_str(EOT_ID);
        }

        Ok(output)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            max_concurrent_generations: Some(self.max_concurrent),
        }
    }

    async fn initialize(&self) -> Result<(), InferenceError> {
        tracing::info!(
            provider = %self.name,
            rules = self.rules.len(),
            max_concurrent_generations = self.max_concurrent,
            "scripted provider ready"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), InferenceError> {
        self.permits.close();
        tracing::info!(provider = %self.name, "scripted provider shut down");
        Ok(())
    }

    async fn chat_completion_stream(&self, request: &ChatCompletionRequest) -> Result<EventStream, InferenceError> {
        let output = self.script_for(request)?;

        let generation = Generation {
            provider: self.name.clone(),
            tokens: tokenize(&output).into_iter().map(str::to_owned).collect(),
            max_tokens: request.sampling_params.max_tokens.unwrap_or(self.max_tokens),
            token_delay: self.token_delay,
            decoder: OutputDecoder::for_request(request),
            permits: Arc::clone(&self.permits),
        };

        let cancel = CancellationToken::new();
        let (tx, stream) = GenerationStream::channel(CHANNEL_CAPACITY, cancel.clone());

        tokio::spawn(async move {
            let provider = generation.provider.clone();
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(provider = %provider, "generation canceled by consumer");
                }
                () = generation.run(tx) => {}
            }
        });

        Ok(Box::pin(stream))
    }
}

/// One generation, run on its own task
struct Generation {
    provider: String,
    tokens: Vec<String>,
    max_tokens: u32,
    token_delay: Option<Duration>,
    decoder: OutputDecoder,
    permits: Arc<Semaphore>,
}

impl Generation {
    async fn run(mut self, tx: EventSender) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            let _ = tx
                .send(Err(InferenceError::Generation(format!(
                    "provider '{}' is shut down",
                    self.provider
                ))))
                .await;
            return;
        };

        if tx.send(Ok(ChatCompletionResponseEvent::start())).await.is_err() {
            return;
        }

        let mut generated: u32 = 0;

        for token in std::mem::take(&mut self.tokens) {
            if self.decoder.is_done() {
                break;
            }

            let is_stop = token == EOT_ID || token == EOM_ID;
            if !is_stop {
                if generated >= self.max_tokens {
                    break;
                }
                generated += 1;
            }

            if let Some(delay) = self.token_delay {
                tokio::time::sleep(delay).await;
            }

            if !send_all(&tx, self.decoder.push(&token)).await {
                return;
            }
        }

        let tail = self.decoder.finish(StopReason::OutOfTokens);
        if !send_all(&tx, tail).await {
            return;
        }

        tracing::debug!(
            provider = %self.provider,
            tokens = generated,
            stop_reason = ?self.decoder.stop_reason(),
            "generation finished"
        );
    }
}

/// Send events in order; false once the consumer is gone
async fn send_all(tx: &EventSender, events: Vec<ChatCompletionResponseEvent>) -> bool {
    for event in events {
        if tx.send(Ok(event)).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use infer_config::ScriptRule;

    use super::*;
    use crate::aggregator::aggregate_stream;
    use crate::types::{
        ChatCompletionResponseEventType, SamplingParams, ToolDefinition, ToolParamDefinition, ToolPromptFormat,
    };

    const MODEL: &str = "Llama3.1-8B-Instruct";

    fn config(rules: &[(&str, &str)]) -> ScriptedProviderConfig {
        ScriptedProviderConfig {
            models: vec![MODEL.to_owned()],
            scripts: rules
                .iter()
                .map(|(pattern, output)| ScriptRule {
                    pattern: (*pattern).to_owned(),
                    output: (*output).to_owned(),
                })
                .collect(),
            fallback: None,
            max_tokens: 512,
            max_concurrent_generations: 1,
            token_delay_ms: None,
        }
    }

    fn request(prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::new(MODEL, vec![Message::user(prompt)])
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let provider = ScriptedProvider::new(
            "local",
            &config(&[
                ("(?i)france", "The capital of France is Paris.<|eot_id|>"),
                ("(?i)capital", "I do not know.<|eot_id|>"),
            ]),
        )
        .unwrap();

        let stream = provider
            .chat_completion_stream(&request("What is the capital of France?"))
            .await
            .unwrap();
        let message = aggregate_stream(stream).await.unwrap();

        assert_eq!(message.content, "The capital of France is Paris.");
        assert_eq!(message.stop_reason, StopReason::EndOfTurn);
    }

    #[tokio::test]
    async fn missing_stop_token_ends_the_turn() {
        let provider = ScriptedProvider::new("local", &config(&[(".*", "Hello there")])).unwrap();

        let stream = provider.chat_completion_stream(&request("hi")).await.unwrap();
        let message = aggregate_stream(stream).await.unwrap();

        assert_eq!(message.content, "Hello there");
        assert_eq!(message.stop_reason, StopReason::EndOfTurn);
    }

    #[tokio::test]
    async fn token_budget_yields_out_of_tokens() {
        let provider =
            ScriptedProvider::new("local", &config(&[(".*", "one two three four<|eot_id|>")])).unwrap();

        let request = request("count").with_sampling_params(SamplingParams {
            max_tokens: Some(2),
            ..SamplingParams::default()
        });
        let stream = provider.chat_completion_stream(&request).await.unwrap();
        let message = aggregate_stream(stream).await.unwrap();

        assert_eq!(message.content, "one two");
        assert_eq!(message.stop_reason, StopReason::OutOfTokens);
    }

    #[tokio::test]
    async fn python_list_output_becomes_tool_calls() {
        let provider = ScriptedProvider::new(
            "local",
            &config(&[("(?i)polyjuice", r#"[get_boiling_point(liquid_name="polyjuice")]<|eot_id|>"#)]),
        )
        .unwrap();

        let tool = ToolDefinition::custom("get_boiling_point", "Get the boiling point of a liquid")
            .with_parameter("liquid_name", ToolParamDefinition::new("str"));
        let request = request("What is the boiling point of polyjuice?")
            .with_tools(vec![tool])
            .with_tool_prompt_format(ToolPromptFormat::PythonList);

        let stream = provider.chat_completion_stream(&request).await.unwrap();
        let message = aggregate_stream(stream).await.unwrap();

        assert_eq!(message.content, "");
        assert_eq!(message.stop_reason, StopReason::EndOfTurn);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].tool_name.as_str(), "get_boiling_point");
        assert_eq!(message.tool_calls[0].arguments["liquid_name"].as_str(), Some("polyjuice"));
    }

    #[tokio::test]
    async fn fallback_and_no_match() {
        let mut with_fallback = config(&[("(?i)weather", "Sunny.<|eot_id|>")]);
        with_fallback.fallback = Some("I can only talk about the weather.<|eot_id|>".to_owned());

        let provider = ScriptedProvider::new("local", &with_fallback).unwrap();
        let stream = provider.chat_completion_stream(&request("hello")).await.unwrap();
        assert_eq!(
            aggregate_stream(stream).await.unwrap().content,
            "I can only talk about the weather."
        );

        let provider = ScriptedProvider::new("local", &config(&[("(?i)weather", "Sunny.<|eot_id|>")])).unwrap();
        let err = provider.chat_completion_stream(&request("hello")).await.err().unwrap();
        assert!(matches!(err, InferenceError::Generation(_)));
    }

    #[test]
    fn invalid_pattern_is_configuration_error() {
        let err = ScriptedProvider::new("local", &config(&[("(unclosed", "x")])).err().unwrap();
        assert!(matches!(err, InferenceError::Configuration(ref m) if m.contains("invalid script pattern")));
    }

    #[tokio::test]
    async fn dropping_stream_releases_permit() {
        let mut slow = config(&[(".*", "a b c d e f g h<|eot_id|>")]);
        slow.token_delay_ms = Some(50);
        let provider = ScriptedProvider::new("local", &slow).unwrap();

        let mut stream = provider.chat_completion_stream(&request("go")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, ChatCompletionResponseEventType::Start);
        assert_eq!(provider.active_generations(), 1);

        drop(stream);

        for _ in 0..50 {
            if provider.active_generations() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(provider.active_generations(), 0);
    }

    #[tokio::test]
    async fn generations_are_serialized() {
        let mut slow = config(&[(".*", "a b c<|eot_id|>")]);
        slow.token_delay_ms = Some(20);
        let provider = ScriptedProvider::new("local", &slow).unwrap();

        let mut first = provider.chat_completion_stream(&request("one")).await.unwrap();
        let mut second = provider.chat_completion_stream(&request("two")).await.unwrap();

        assert!(first.next().await.is_some());
        assert_eq!(provider.active_generations(), 1);

        let second_start = tokio::time::timeout(Duration::from_millis(30), second.next()).await;
        assert!(second_start.is_err(), "second generation started while the first held the permit");

        while first.next().await.is_some() {}
        assert!(second.next().await.is_some());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_generations() {
        let provider = ScriptedProvider::new("local", &config(&[(".*", "ok<|eot_id|>")])).unwrap();
        provider.shutdown().await.unwrap();

        let mut stream = provider.chat_completion_stream(&request("hi")).await.unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, InferenceError::Generation(_)));
    }
}
