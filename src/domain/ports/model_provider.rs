//! Model provider port.
//!
//! The core never performs inference itself; it sends prompts through this
//! trait and consumes either a full text response or a stream of parts
//! carrying text deltas and tool calls.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cancellation::CancellationSignal;
use crate::domain::error::SwarmResult;

/// Who authored a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    System,
    User,
    Ai,
}

/// Payload of a transcript message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Text {
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// One message in a model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub actor: Actor,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl ModelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            actor: Actor::System,
            payload: MessagePayload::Text { content: content.into() },
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            actor: Actor::User,
            payload: MessagePayload::Text { content: content.into() },
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            actor: Actor::Ai,
            payload: MessagePayload::Text { content: content.into() },
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            actor: Actor::Ai,
            payload: MessagePayload::ToolUse {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            actor: Actor::User,
            payload: MessagePayload::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            },
        }
    }
}

/// JSON-schema description of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: serde_json::Value,
}

/// Requested response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// A prompt sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub session_id: Uuid,
    pub request_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    /// Model identifier
    pub model: String,
    /// Conversation so far
    pub messages: Vec<ModelMessage>,
    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,
    /// Requested response shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Output token cap
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(session_id: Uuid, model: impl Into<String>, messages: Vec<ModelMessage>) -> Self {
        Self {
            session_id,
            request_id: Uuid::new_v4(),
            agent_id: None,
            model: model.into(),
            messages,
            tools: None,
            response_format: None,
            max_tokens: 4096,
        }
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// One tool call carried inside a stream part. Arguments arrive as JSON
/// text; the runner parses them once `finished` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub finished: bool,
}

/// A chunk of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPart {
    /// Incremental assistant text
    Text { content: String },
    /// One or more tool calls
    ToolCalls { tool_calls: Vec<ToolCallPart> },
    /// Token accounting, typically delivered at stream end
    Usage { input_tokens: u64, output_tokens: u64 },
}

/// Complete (non-streamed) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Stream of response parts; ends at stream close or cancellation.
pub type PartStream = BoxStream<'static, SwarmResult<StreamPart>>;

/// Sends prompts to a language model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Issue a request and wait for the full text response.
    async fn complete(
        &self,
        request: ModelRequest,
        cancel: CancellationSignal,
    ) -> SwarmResult<ModelResponse>;

    /// Issue a request and stream response parts.
    async fn stream(
        &self,
        request: ModelRequest,
        cancel: CancellationSignal,
    ) -> SwarmResult<PartStream>;
}
