//! Mock OpenAI-compatible backend for integration tests
//!
//! Serves `/v1/chat/completions` as an SSE stream with canned replies and
//! records each request it receives.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// What the mock answers with
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Stream the words of the text, then finish with `stop`
    Text(String),
    /// Stream one tool call in fragments, then finish with `tool_calls`
    ToolCall {
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
    },
    /// Reject with the given status and an `OpenAI` error body
    Fail(StatusCode),
}

/// A request received by the mock
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Parsed JSON body
    pub body: serde_json::Value,
    /// `Authorization` header, if any
    pub authorization: Option<String>,
}

/// Running mock server
pub struct MockOpenAi {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    reply: MockReply,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockOpenAi {
    /// Start the mock server, returning immediately
    pub async fn start(reply: MockReply) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            reply,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a provider
    ///
    /// Includes `/v1` since the provider appends `/chat/completions`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("request log poisoned").clone()
    }
}

impl Drop for MockOpenAi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_chat_completions(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    state
        .requests
        .lock()
        .expect("request log poisoned")
        .push(RecordedRequest { body, authorization });

    let frames = match &state.reply {
        MockReply::Fail(status) => {
            return (
                *status,
                Json(json!({
                    "error": {
                        "message": "mock server intentional failure",
                        "type": "server_error"
                    }
                })),
            )
                .into_response();
        }
        MockReply::Text(text) => {
            let mut frames = vec![json!({"role": "assistant", "content": ""})];
            frames.extend(text.split_inclusive(' ').map(|word| json!({ "content": word })));
            frames.into_iter().map(|delta| (delta, None)).chain([(json!({}), Some("stop"))]).collect::<Vec<_>>()
        }
        MockReply::ToolCall { name, arguments } => {
            let (head, tail) = arguments.split_at(arguments.len() / 2);
            vec![
                (
                    json!({
                        "role": "assistant",
                        "tool_calls": [{
                            "index": 0,
                            "id": "call_test_stream",
                            "type": "function",
                            "function": { "name": name, "arguments": head }
                        }]
                    }),
                    None,
                ),
                (
                    json!({ "tool_calls": [{ "index": 0, "function": { "arguments": tail } }] }),
                    None,
                ),
                (json!({}), Some("tool_calls")),
            ]
        }
    };

    let mut body = String::new();
    for (delta, finish_reason) in frames {
        let chunk = json!({
            "id": "chatcmpl-test-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000u64,
            "model": "mock",
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
