//! OpenAI-compatible LLM Provider
//!
//! Implementation of `ModelProvider` against the OpenAI chat-completions
//! wire format (works with any compatible gateway via `OPENAI_BASE_URL`).
//! Tool calling uses the native `tools`/`tool_calls` fields; streaming
//! decodes the `data:` SSE frames into `StreamChunk`s.

use std::time::Duration;

use agentry_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        Completion, CompletionStream, GenerationOptions, ModelProvider, ModelReply, StreamChunk,
        TokenUsage,
    },
    tool::{ToolCall, ToolSchema},
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token
    pub api_key: String,

    /// Base URL of the chat-completions API
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".into(),
            timeout_secs: 120,
        }
    }

    /// Read `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::Config("OPENAI_API_KEY is not set".into()))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        Ok(config)
    }
}

/// OpenAI-compatible chat-completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create from configuration
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_chat(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => AgentError::Auth(detail),
            429 => AgentError::RateLimited(detail),
            _ => AgentError::Provider(format!("HTTP {}: {}", status, detail)),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;

        match response {
            Ok(r) => Ok(r.status().is_success()),
            Err(e) => {
                tracing::warn!("Provider health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let body = ChatRequest::build(messages, tools, options, false);
        let response = self.post_chat(&body).await?;

        let wire: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;

        convert_completion(wire)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let body = ChatRequest::build(messages, &[], options, true);
        let response = self.post_chat(&body).await?;

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            let mut finished = false;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| AgentError::Provider(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let Some(payload) = sse_data(&line) else {
                        continue;
                    };

                    if payload == "[DONE]" {
                        finished = true;
                        break;
                    }

                    let frame: StreamFrame = serde_json::from_str(payload)
                        .map_err(|e| AgentError::Parse(e.to_string()))?;
                    let usage = frame.usage.map(WireUsage::into_usage);
                    let delta = frame
                        .choices
                        .first()
                        .and_then(|c| c.delta.content.clone())
                        .unwrap_or_default();

                    if !delta.is_empty() || usage.is_some() {
                        yield StreamChunk { delta, done: false, usage };
                    }
                }

                if finished {
                    break;
                }
            }

            yield StreamChunk { delta: String::new(), done: true, usage: None };
        };

        Ok(Box::pin(stream))
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn build(
        messages: &[Message],
        tools: &[ToolSchema],
        options: &'a GenerationOptions,
        stream: bool,
    ) -> Self {
        let tools = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(tool_to_wire).collect())
        };

        Self {
            model: &options.model,
            messages: messages.iter().map(convert_message).collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            stop: options.stop_sequences.clone(),
            tool_choice: tools.as_ref().map(|_| "auto"),
            tools,
            stream,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl WireUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Convert an agent message to the wire format. Assistant placeholders that
/// carry a tool request serialize as `tool_calls` with null content.
fn convert_message(message: &Message) -> WireMessage {
    let pending_calls = message
        .metadata
        .as_ref()
        .and_then(|m| m.tool_calls.as_ref())
        .filter(|calls| !calls.is_empty());

    match (&message.role, pending_calls) {
        (Role::Assistant, Some(calls)) => WireMessage {
            role: "assistant".into(),
            content: None,
            tool_calls: Some(
                calls
                    .iter()
                    .enumerate()
                    .map(|(i, call)| WireToolCall {
                        id: call.id.clone().unwrap_or_else(|| format!("call_{}", i)),
                        kind: "function".into(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments_value().to_string(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        },
        (Role::Tool, _) => WireMessage {
            role: "tool".into(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: message
                .metadata
                .as_ref()
                .and_then(|m| m.tool_call_id.clone())
                .or_else(|| Some("call_0".into())),
        },
        (role, _) => WireMessage {
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

/// Translate a tool schema into OpenAI function-calling form
fn tool_to_wire(schema: &ToolSchema) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in &schema.parameters {
        properties.insert(
            param.name.clone(),
            json!({ "type": param.param_type, "description": param.description }),
        );
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    json!({
        "type": "function",
        "function": {
            "name": schema.name,
            "description": schema.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        },
    })
}

/// Convert a wire response into the tagged completion the loop consumes
fn convert_completion(wire: ChatResponse) -> Result<Completion> {
    let usage = wire.usage.map(WireUsage::into_usage);
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Parse("response contained no choices".into()))?;

    let reply = match choice.message.tool_calls.filter(|c| !c.is_empty()) {
        Some(wire_calls) => {
            let mut calls = Vec::with_capacity(wire_calls.len());
            for wire_call in wire_calls {
                let arguments: Value = serde_json::from_str(&wire_call.function.arguments)
                    .map_err(|e| {
                        AgentError::Parse(format!(
                            "malformed arguments for tool '{}': {}",
                            wire_call.function.name, e
                        ))
                    })?;
                calls.push(
                    ToolCall::new(wire_call.function.name, arguments).with_id(wire_call.id),
                );
            }
            ModelReply::ToolUse(calls)
        }
        None => ModelReply::Answer(choice.message.content.unwrap_or_default()),
    };

    Ok(Completion {
        reply,
        model: wire.model,
        usage,
    })
}

/// Extract the payload of a `data:` SSE line, if any
fn sse_data(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim)
}
