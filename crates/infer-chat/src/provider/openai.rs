//! OpenAI-compatible provider implementation

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use infer_config::OpenAiCompatibleConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{Provider, ProviderCapabilities};
use crate::convert::openai::{OpenAiStreamTranslator, to_openai_request};
use crate::error::InferenceError;
use crate::protocol::openai::{OpenAiErrorResponse, OpenAiStreamChunk};
use crate::stream::EventStream;
use crate::types::{ChatCompletionRequest, ChatCompletionResponseEvent};

/// OpenAI-compatible provider
pub struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    model_map: HashMap<String, String>,
}

impl OpenAiProvider {
    /// Create from provider configuration
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::Configuration` if the HTTP client cannot be built
    pub fn new(name: impl Into<String>, config: &OpenAiCompatibleConfig) -> Result<Self, InferenceError> {
        let name = name.into();

        let mut builder = Client::builder();
        if let Some(seconds) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(seconds));
        }
        let client = builder
            .build()
            .map_err(|e| InferenceError::Configuration(format!("provider '{name}': failed to build HTTP client: {e}")))?;

        Ok(Self {
            name,
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model_map: config.model_map.clone(),
        })
    }

    /// Build the chat completions URL
    fn completions_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Upstream id for a served model
    fn upstream_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_map.get(model).map_or(model, String::as_str)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            max_concurrent_generations: None,
        }
    }

    async fn chat_completion_stream(&self, request: &ChatCompletionRequest) -> Result<EventStream, InferenceError> {
        let upstream_model = self.upstream_model(&request.model);
        let wire_request = to_openai_request(request, upstream_model);

        tracing::debug!(
            provider = %self.name,
            model = %request.model,
            upstream_model = %upstream_model,
            "sending upstream request"
        );

        let mut builder = self.client.post(self.completions_url()).json(&wire_request);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(provider = %self.name, error = %e, "upstream stream request failed");
            InferenceError::Upstream(e.to_string())
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<OpenAiErrorResponse>(&body)
                .map_or(body, |parsed| parsed.error.message);
            tracing::warn!(provider = %self.name, status = %status, "upstream returned error");
            return Err(InferenceError::Upstream(format!("provider returned {status}: {detail}")));
        }

        let sse = Box::pin(response.bytes_stream().eventsource());
        Ok(Box::pin(translate_sse(sse, self.name.clone())))
    }
}

struct SseState<S> {
    sse: S,
    translator: OpenAiStreamTranslator,
    queue: VecDeque<Result<ChatCompletionResponseEvent, InferenceError>>,
    finished: bool,
    provider: String,
}

/// Drive an SSE body through the translator
fn translate_sse<S, E>(
    sse: S,
    provider: String,
) -> impl Stream<Item = Result<ChatCompletionResponseEvent, InferenceError>> + Send
where
    S: Stream<Item = Result<eventsource_stream::Event, E>> + Send + Unpin,
    E: std::fmt::Display + Send,
{
    let state = SseState {
        sse,
        translator: OpenAiStreamTranslator::new(),
        queue: VecDeque::new(),
        finished: false,
        provider,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.sse.next().await {
                Some(Ok(event)) => {
                    let data = event.data.trim();
                    if data == "[DONE]" {
                        state.finished = true;
                        state.queue.extend(state.translator.on_done().into_iter().map(Ok));
                        continue;
                    }

                    if let Ok(error) = serde_json::from_str::<OpenAiErrorResponse>(data) {
                        tracing::warn!(provider = %state.provider, error = %error.error.message, "upstream error mid-stream");
                        state.finished = true;
                        state.queue.push_back(Err(InferenceError::Upstream(error.error.message)));
                        continue;
                    }

                    match serde_json::from_str::<OpenAiStreamChunk>(data) {
                        Ok(chunk) => state.queue.extend(state.translator.on_chunk(&chunk).into_iter().map(Ok)),
                        Err(e) => {
                            tracing::debug!(error = %e, data = %data, "skipping unparseable SSE chunk");
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.queue.push_back(Err(InferenceError::Streaming(e.to_string())));
                }
                None => {
                    state.finished = true;
                    if state.translator.is_finished() {
                        state.queue.extend(state.translator.on_done().into_iter().map(Ok));
                    } else if !state.translator.is_completed() {
                        tracing::warn!(provider = %state.provider, "upstream closed the stream before finishing");
                        state.queue.push_back(Err(InferenceError::Streaming(
                            "upstream closed the stream before finishing".to_owned(),
                        )));
                    }
                }
            }
        }
    })
}
