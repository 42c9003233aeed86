//! HTTP Handlers
//!
//! Thin request/response glue over the agent core: payload validation, API
//! key checks and SSE framing. No agent logic lives here.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use agentry_core::provider::GenerationOptions;
use agentry_core::trace::TraceEntry;
use agentry_core::{Message, ModelReply, Role, TokenUsage};

use crate::config::MAX_ITERATIONS_LIMIT;
use crate::presets::{self, AgentKind};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub provider_connected: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessageDto {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessageDto>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub message: ChatMessageDto,
    pub usage: Option<TokenUsage>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentRunRequest {
    pub task: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

fn default_agent_type() -> String {
    "general".into()
}

#[derive(Debug, Serialize)]
pub struct AgentRunResponse {
    pub answer: String,
    pub iterations: u32,
    pub execution_trace: Vec<TraceEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Auth
// ============================================================================

/// Validate the `Authorization` header: `Bearer <key>` or `ApiKey <key>`.
/// When a key is configured it must match; the format is enforced either way.
pub fn require_api_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "No authorization header"))?;

    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let key = parts.next().unwrap_or_default();

    if !matches!(scheme, "Bearer" | "ApiKey") || key.is_empty() {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Invalid authorization format",
        ));
    }

    if let Some(expected) = expected {
        if key != expected {
            return Err(api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid API key"));
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_role(raw: &str) -> Result<Role, ApiError> {
    match raw {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_ROLE",
            format!("Unknown message role: {other}"),
        )),
    }
}

fn to_messages(dtos: &[ChatMessageDto]) -> Result<Vec<Message>, ApiError> {
    dtos.iter()
        .map(|dto| Ok(Message::new(parse_role(&dto.role)?, &dto.content)))
        .collect()
}

fn generation_options(
    state: &AppState,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> GenerationOptions {
    let mut options = GenerationOptions {
        model: model.unwrap_or_else(|| state.config.model.clone()),
        ..Default::default()
    };
    if let Some(temperature) = temperature {
        options.temperature = temperature;
    }
    if let Some(max_tokens) = max_tokens {
        options.max_tokens = max_tokens;
    }
    options
}

async fn complete_text(
    state: &AppState,
    messages: Vec<Message>,
    options: &GenerationOptions,
) -> Result<(String, Option<TokenUsage>), ApiError> {
    let completion = state
        .provider
        .complete(&messages, &[], options)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Completion failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR", e.user_message())
        })?;

    match completion.reply {
        ModelReply::Answer(text) => Ok((text, completion.usage)),
        ModelReply::ToolUse(_) => Err(api_error(
            StatusCode::BAD_GATEWAY,
            "PROVIDER_ERROR",
            "Provider requested a tool call on a plain completion",
        )),
    }
}

fn sse_from_provider(
    stream: agentry_core::provider::CompletionStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream.map(|result| {
        let payload = match result {
            Ok(chunk) if chunk.done => json!({ "type": "done", "finish_reason": "stop" }),
            Ok(chunk) => json!({ "type": "content", "content": chunk.delta }),
            Err(e) => json!({ "type": "error", "error": e.to_string() }),
        };
        Ok(Event::default().data(payload.to_string()))
    });
    Sse::new(events)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint (unauthenticated)
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "ok",
        service: "agentry-server",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
        provider_connected,
    })
}

/// Multi-turn chat completion
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    require_api_key(&headers, state.config.api_key.as_deref())?;

    if payload.messages.is_empty() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "EMPTY_MESSAGES",
            "At least one message is required",
        ));
    }

    let messages = to_messages(&payload.messages)?;
    let options = generation_options(&state, payload.model, payload.temperature, payload.max_tokens);
    let (text, usage) = complete_text(&state, messages, &options).await?;

    Ok(Json(ChatResponse {
        id: uuid::Uuid::new_v4().to_string(),
        model: options.model,
        message: ChatMessageDto {
            role: "assistant".into(),
            content: text,
        },
        usage,
        created_at: Utc::now().to_rfc3339(),
    }))
}

/// Single-prompt text completion
pub async fn completion_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>, ApiError> {
    require_api_key(&headers, state.config.api_key.as_deref())?;

    let messages = vec![Message::user(&payload.prompt)];
    let options = generation_options(&state, payload.model, payload.temperature, payload.max_tokens);
    let (text, usage) = complete_text(&state, messages, &options).await?;

    Ok(Json(CompletionResponse {
        id: uuid::Uuid::new_v4().to_string(),
        model: options.model,
        text,
        usage,
        created_at: Utc::now().to_rfc3339(),
    }))
}

/// SSE token stream for a chat request
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require_api_key(&headers, state.config.api_key.as_deref())?;

    let messages = to_messages(&payload.messages)?;
    let options = generation_options(&state, payload.model, payload.temperature, payload.max_tokens);

    let stream = state
        .provider
        .complete_stream(&messages, &options)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Stream start failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR", e.user_message())
        })?;

    Ok(sse_from_provider(stream))
}

/// SSE token stream for a single prompt
pub async fn completion_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CompletionRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require_api_key(&headers, state.config.api_key.as_deref())?;

    let messages = vec![Message::user(&payload.prompt)];
    let options = generation_options(&state, payload.model, payload.temperature, payload.max_tokens);

    let stream = state
        .provider
        .complete_stream(&messages, &options)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Stream start failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR", e.user_message())
        })?;

    Ok(sse_from_provider(stream))
}

/// Run an autonomous agent on a task
pub async fn agent_run_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AgentRunRequest>,
) -> Result<Json<AgentRunResponse>, ApiError> {
    require_api_key(&headers, state.config.api_key.as_deref())?;

    if payload.task.trim().is_empty() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "EMPTY_TASK",
            "Task must not be empty",
        ));
    }

    let kind = AgentKind::parse(&payload.agent_type).ok_or_else(|| {
        api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_AGENT_TYPE",
            format!("Unknown agent_type: {}", payload.agent_type),
        )
    })?;

    let max_iterations = payload
        .max_iterations
        .unwrap_or(state.config.agent_max_iterations);
    if max_iterations == 0 || max_iterations > MAX_ITERATIONS_LIMIT {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_MAX_ITERATIONS",
            format!("max_iterations must be between 1 and {MAX_ITERATIONS_LIMIT}"),
        ));
    }

    let options = generation_options(&state, None, None, None);
    let agent = presets::build_agent(kind, state.provider.clone(), options, max_iterations)
        .map_err(|e| {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR", e.user_message())
        })?;

    let result = agent.run(&payload.task).await.map_err(|failure| {
        tracing::error!(error = %failure, "Agent run failed");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "AGENT_ERROR",
            failure.error.user_message(),
        )
    })?;

    Ok(Json(AgentRunResponse {
        answer: result.answer,
        iterations: result.iterations,
        execution_trace: result.execution_trace,
        usage: result.usage,
        error: result.error,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_auth_missing_header() {
        assert!(require_api_key(&HeaderMap::new(), None).is_err());
    }

    #[test]
    fn test_auth_accepts_bearer_and_apikey() {
        assert!(require_api_key(&headers_with("Bearer sk-1"), None).is_ok());
        assert!(require_api_key(&headers_with("ApiKey sk-1"), None).is_ok());
    }

    #[test]
    fn test_auth_rejects_bad_scheme() {
        assert!(require_api_key(&headers_with("Basic dXNlcg=="), None).is_err());
        assert!(require_api_key(&headers_with("Bearer"), None).is_err());
    }

    #[test]
    fn test_auth_compares_configured_key() {
        assert!(require_api_key(&headers_with("Bearer right"), Some("right")).is_ok());
        assert!(require_api_key(&headers_with("Bearer wrong"), Some("right")).is_err());
    }

    #[test]
    fn test_parse_role() {
        assert!(parse_role("user").is_ok());
        assert!(parse_role("tool").is_ok());
        assert!(parse_role("wizard").is_err());
    }
}
