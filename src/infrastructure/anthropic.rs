//! Anthropic-wire implementation of the [`ModelProvider`] port.
//!
//! Non-streaming requests go through `complete` with exponential-backoff
//! retry on transient failures. Streaming requests parse the messages SSE
//! protocol into [`StreamPart`]s: text deltas, finished tool calls, and a
//! trailing usage part.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::ports::cancellation::CancellationSignal;
use crate::domain::ports::model_provider::{
    Actor, MessagePayload, ModelMessage, ModelProvider, ModelRequest, ModelResponse, PartStream,
    ResponseFormat, StreamPart, ToolCallPart,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Settings for the HTTP client.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(120),
            max_retries: 3,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// HTTP model provider speaking the Anthropic messages protocol.
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> SwarmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SwarmError::ConfigurationError(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    /// Build the wire-format request body.
    fn build_body(request: &ModelRequest, stream: bool) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();

        for message in &request.messages {
            match (&message.actor, &message.payload) {
                (Actor::System, MessagePayload::Text { content }) => {
                    system_parts.push(content);
                }
                (actor, payload) => {
                    let role = if matches!(actor, Actor::Ai) { "assistant" } else { "user" };
                    let block = match payload {
                        MessagePayload::Text { content } => {
                            json!({"type": "text", "text": content})
                        }
                        MessagePayload::ToolUse { id, name, arguments } => {
                            let input: Value = serde_json::from_str(arguments)
                                .unwrap_or_else(|_| json!({}));
                            json!({"type": "tool_use", "id": id, "name": name, "input": input})
                        }
                        MessagePayload::ToolResult { tool_use_id, content, is_error } => {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": tool_use_id,
                                "content": content,
                                "is_error": is_error
                            })
                        }
                    };
                    // Consecutive blocks for the same role are merged so
                    // tool_use/tool_result pairs stay adjacent.
                    match messages.last_mut() {
                        Some(last) if last["role"] == role => {
                            last["content"].as_array_mut().expect("array content").push(block);
                        }
                        _ => messages.push(json!({"role": role, "content": [block]})),
                    }
                }
            }
        }

        let mut system = system_parts.join("\n\n");
        if request.response_format == Some(ResponseFormat::JsonObject) {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str("Respond with a single JSON object and nothing else.");
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(tools) = &request.tools {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, body: &Value) -> SwarmResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| SwarmError::ModelApiError(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let text = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            429 => SwarmError::ModelRateLimited { retry_after_secs: retry_after },
            401 | 403 => SwarmError::ModelNotAvailable(format!("auth rejected: {text}")),
            code => SwarmError::ModelApiError(format!("status {code}: {text}")),
        })
    }

    /// Post with exponential-backoff retry on transient failures.
    async fn post_with_retry(&self, body: &Value) -> SwarmResult<reqwest::Response> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build();

        let attempts = std::sync::atomic::AtomicU32::new(0);
        backoff::future::retry(policy, || async {
            match self.post(body).await {
                Ok(response) => Ok(response),
                Err(e) if e.is_transient() => {
                    let attempt = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    if attempt >= self.config.max_retries {
                        Err(backoff::Error::permanent(e))
                    } else {
                        tracing::warn!(error = %e, attempt, "retrying model request");
                        Err(backoff::Error::transient(e))
                    }
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn complete(
        &self,
        request: ModelRequest,
        mut cancel: CancellationSignal,
    ) -> SwarmResult<ModelResponse> {
        let body = Self::build_body(&request, false);
        let response = tokio::select! {
            result = self.post_with_retry(&body) => result?,
            () = cancel.cancelled() => {
                return Err(SwarmError::ModelApiError("request cancelled".to_string()));
            }
        };

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SwarmError::ModelApiError(format!("invalid response: {e}")))?;

        let content = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(ModelResponse {
            content,
            model: payload["model"].as_str().unwrap_or(&request.model).to_string(),
            input_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0),
        })
    }

    async fn stream(
        &self,
        request: ModelRequest,
        cancel: CancellationSignal,
    ) -> SwarmResult<PartStream> {
        let body = Self::build_body(&request, true);
        let response = self.post_with_retry(&body).await?;

        let (tx, rx) = mpsc::channel::<SwarmResult<StreamPart>>(64);
        tokio::spawn(pump_sse(response, tx, cancel));

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

/// Read the SSE body, translating events into stream parts until the
/// stream closes or cancellation fires.
async fn pump_sse(
    response: reqwest::Response,
    tx: mpsc::Sender<SwarmResult<StreamPart>>,
    mut cancel: CancellationSignal,
) {
    let mut bytes = response.bytes_stream();
    let mut buffer = String::new();
    // Tool-use blocks accumulate partial JSON keyed by block index.
    let mut tool_blocks: HashMap<u64, (String, String, String)> = HashMap::new();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;

    loop {
        let chunk = tokio::select! {
            chunk = bytes.next() => chunk,
            () = cancel.cancelled() => break,
        };
        let Some(chunk) = chunk else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(Err(SwarmError::ModelApiError(format!("stream error: {e}"))))
                    .await;
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(boundary) = buffer.find("\n\n") {
            let event_text = buffer[..boundary].to_string();
            buffer.drain(..boundary + 2);
            let Some(data) = parse_sse_data(&event_text) else { continue };

            match data["type"].as_str().unwrap_or("") {
                "message_start" => {
                    input_tokens = data["message"]["usage"]["input_tokens"]
                        .as_u64()
                        .unwrap_or(0);
                }
                "content_block_start" => {
                    if data["content_block"]["type"] == "tool_use" {
                        let index = data["index"].as_u64().unwrap_or(0);
                        let id = data["content_block"]["id"].as_str().unwrap_or("").to_string();
                        let name =
                            data["content_block"]["name"].as_str().unwrap_or("").to_string();
                        tool_blocks.insert(index, (id, name, String::new()));
                    }
                }
                "content_block_delta" => match data["delta"]["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = data["delta"]["text"].as_str() {
                            if tx
                                .send(Ok(StreamPart::Text { content: text.to_string() }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    "input_json_delta" => {
                        let index = data["index"].as_u64().unwrap_or(0);
                        if let (Some(block), Some(partial)) = (
                            tool_blocks.get_mut(&index),
                            data["delta"]["partial_json"].as_str(),
                        ) {
                            block.2.push_str(partial);
                        }
                    }
                    _ => {}
                },
                "content_block_stop" => {
                    let index = data["index"].as_u64().unwrap_or(0);
                    if let Some((id, name, arguments)) = tool_blocks.remove(&index) {
                        let arguments = if arguments.is_empty() {
                            "{}".to_string()
                        } else {
                            arguments
                        };
                        let part = StreamPart::ToolCalls {
                            tool_calls: vec![ToolCallPart { id, name, arguments, finished: true }],
                        };
                        if tx.send(Ok(part)).await.is_err() {
                            return;
                        }
                    }
                }
                "message_delta" => {
                    if let Some(tokens) = data["usage"]["output_tokens"].as_u64() {
                        output_tokens = tokens;
                    }
                }
                "message_stop" => {
                    let _ = tx
                        .send(Ok(StreamPart::Usage { input_tokens, output_tokens }))
                        .await;
                    return;
                }
                _ => {}
            }
        }
    }

    // Stream closed without message_stop (or cancelled): still report
    // whatever usage we saw.
    let _ = tx
        .send(Ok(StreamPart::Usage { input_tokens, output_tokens }))
        .await;
}

/// Pull the JSON out of one SSE event block.
fn parse_sse_data(event_text: &str) -> Option<Value> {
    for line in event_text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            continue;
        }
        if let Some(data) = trimmed.strip_prefix("data:") {
            return serde_json::from_str(data.trim()).ok();
        }
    }
    None
}
