//! Agent Execution Loop
//!
//! Bounded iterative loop interleaving model-provider calls with tool
//! dispatch. Each run owns its working message sequence and execution trace;
//! persistent memory only gains the task and, on success, the final answer.
//!
//! Terminal outcomes: a final answer (`RunResult`), an exhausted iteration
//! budget (`RunResult` with an explicit marker), or a fatal provider error
//! (`RunFailure` carrying the partial trace).

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::memory::{AgentMemory, DEFAULT_MAX_MESSAGES};
use crate::message::{Message, Role};
use crate::provider::{GenerationOptions, ModelProvider, ModelReply, TokenUsage};
use crate::tool::{Tool, ToolRegistry};
use crate::trace::TraceEntry;

/// Marker placed in `RunResult::error` when the iteration budget ran out
pub const MAX_ITERATIONS_MARKER: &str = "max_iterations_reached";

const EXHAUSTED_ANSWER: &str =
    "I apologize, but I couldn't complete the task within the iteration limit.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Use the available tools to help answer questions and complete tasks.";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Fixed instruction prompt sent as the leading system message
    pub system_prompt: String,

    /// Maximum loop iterations before giving up
    pub max_iterations: u32,

    /// Generation options forwarded to the provider
    pub generation: GenerationOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
            generation: GenerationOptions::default(),
        }
    }
}

/// Successful run outcome: a final answer or a policy-bounded non-answer
#[derive(Clone, Debug, serde::Serialize)]
pub struct RunResult {
    /// Final answer, or an apology when the budget was exhausted
    pub answer: String,

    /// Number of iterations consumed (1-indexed, ≤ configured max)
    pub iterations: u32,

    /// Ordered audit log of the run
    pub execution_trace: Vec<TraceEntry>,

    /// Token usage accumulated across all model calls of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    /// Set to `max_iterations_reached` when the budget ran out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// Whether the run ended by exhausting its iteration budget
    pub fn exhausted(&self) -> bool {
        self.error.as_deref() == Some(MAX_ITERATIONS_MARKER)
    }
}

/// Fatal run outcome: the provider failed or the run was cancelled.
/// Carries the trace accumulated up to the failure point.
#[derive(Debug, Error)]
#[error("agent run failed after {iterations} iteration(s): {error}")]
pub struct RunFailure {
    #[source]
    pub error: AgentError,

    /// Iterations completed before the failure
    pub iterations: u32,

    /// Partial audit log
    pub execution_trace: Vec<TraceEntry>,
}

/// Autonomous agent with tool calling and bounded memory
pub struct Agent {
    name: String,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    memory: AgentMemory,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            name: "agent".into(),
            provider,
            tools,
            memory: AgentMemory::default(),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(provider, tools, AgentConfig::default())
    }

    /// Run the agent on a task
    pub async fn run(&self, task: &str) -> std::result::Result<RunResult, RunFailure> {
        self.run_with_cancellation(task, &CancellationToken::new())
            .await
    }

    /// Run the agent on a task with cooperative cancellation, checked before
    /// each iteration starts. Cancellation mid-tool-invocation is the tool's
    /// own responsibility.
    pub async fn run_with_cancellation(
        &self,
        task: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunResult, RunFailure> {
        let run_id = Uuid::new_v4();
        tracing::info!(agent = %self.name, %run_id, "Starting agent run");

        self.memory.append(Role::User, task, None);

        // Working message sequence: owned by this run, seeded from the
        // system prompt plus a memory snapshot. Tool exchanges land here,
        // never in persistent memory.
        let mut transcript: Vec<Message> = Vec::with_capacity(self.memory.len() + 1);
        transcript.push(Message::system(&self.config.system_prompt));
        transcript.extend(self.memory.replay(None));

        let catalog = self.tools.schemas();
        let max_iterations = self.config.max_iterations.max(1);

        let mut trace: Vec<TraceEntry> = Vec::new();
        let mut usage: Option<TokenUsage> = None;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                tracing::info!(%run_id, iteration, "Run cancelled");
                trace.push(TraceEntry::error(iteration, "run cancelled"));
                return Err(RunFailure {
                    error: AgentError::Cancelled,
                    iterations: iteration - 1,
                    execution_trace: trace,
                });
            }

            let completion = match self
                .provider
                .complete(&transcript, &catalog, &self.config.generation)
                .await
            {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::error!(%run_id, iteration, error = %e, "Provider call failed");
                    trace.push(TraceEntry::error(iteration, e.to_string()));
                    return Err(RunFailure {
                        error: e,
                        iterations: iteration,
                        execution_trace: trace,
                    });
                }
            };

            if let Some(report) = completion.usage {
                usage.get_or_insert_with(TokenUsage::default).absorb(report);
            }
            trace.push(TraceEntry::model_call(iteration, completion.finish_reason()));

            match completion.reply {
                ModelReply::ToolUse(calls) => {
                    // Strictly sequential dispatch keeps the trace a
                    // deterministic replay of real invocation order.
                    for call in calls {
                        tracing::debug!(%run_id, iteration, tool = %call.name, "Dispatching tool");
                        trace.push(TraceEntry::tool_call(
                            iteration,
                            &call.name,
                            call.arguments_value(),
                        ));

                        let result = self.tools.dispatch(&call).await;
                        trace.push(TraceEntry::tool_result(iteration, &call.name, result.clone()));

                        let call_id = call.id.clone();
                        transcript.push(Message::tool_request(call));
                        transcript.push(Message::tool(result.to_string(), call_id));
                    }
                }
                ModelReply::Answer(answer) => {
                    tracing::info!(%run_id, iteration, "Run complete");
                    self.memory.append(Role::Assistant, &answer, None);
                    return Ok(RunResult {
                        answer,
                        iterations: iteration,
                        execution_trace: trace,
                        usage,
                        error: None,
                    });
                }
            }
        }

        tracing::warn!(%run_id, max_iterations, "Iteration budget exhausted");
        Ok(RunResult {
            answer: EXHAUSTED_ANSWER.into(),
            iterations: max_iterations,
            execution_trace: trace,
            usage,
            error: Some(MAX_ITERATIONS_MARKER.into()),
        })
    }

    /// Register an additional tool after construction
    pub fn add_tool<T: Tool + 'static>(&self, tool: T) {
        self.tools.register(tool);
    }

    /// Clear persistent memory between unrelated tasks
    pub fn reset(&self) {
        self.memory.clear();
    }

    /// Agent display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the conversation memory
    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    name: String,
    provider: Option<Arc<dyn ModelProvider>>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    memory_capacity: usize,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            name: "agent".into(),
            provider: None,
            tools: Arc::new(ToolRegistry::new()),
            config: AgentConfig::default(),
            memory_capacity: DEFAULT_MAX_MESSAGES,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: Tool + 'static>(self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        let mut agent = Agent::new(provider, self.tools, self.config);
        agent.name = self.name;
        agent.memory = AgentMemory::new(self.memory_capacity);
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::provider::{Completion, CompletionStream};
    use crate::tool::{CalculatorTool, ParameterSchema, ToolCall, ToolSchema};

    /// Provider that replays a fixed script of completions and records the
    /// catalog size it was offered on each call.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<Completion>>>,
        catalog_sizes: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Completion>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                catalog_sizes: Mutex::new(Vec::new()),
            }
        }

        fn answer(text: &str) -> Result<Completion> {
            Ok(Completion {
                reply: ModelReply::Answer(text.into()),
                model: "scripted".into(),
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
            })
        }

        fn tool_use(calls: Vec<ToolCall>) -> Result<Completion> {
            Ok(Completion {
                reply: ModelReply::ToolUse(calls),
                model: "scripted".into(),
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            _messages: &[Message],
            tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<Completion> {
            self.catalog_sizes.lock().unwrap().push(tools.len());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::Provider("script exhausted".into())))
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<CompletionStream> {
            Err(AgentError::Other("streaming not scripted".into()))
        }
    }

    /// Tool whose capability always fails
    struct ExplodingTool;

    #[async_trait]
    impl crate::tool::Tool for ExplodingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "explode".into(),
                description: "Always fails".into(),
                parameters: vec![ParameterSchema::optional("fuse", "string", "unused")],
            }
        }

        async fn execute(&self, _call: &ToolCall) -> Result<serde_json::Value> {
            Err(AgentError::ToolFailed("kaboom".into()))
        }
    }

    fn agent_with(script: Vec<Result<Completion>>) -> Agent {
        AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .build()
            .unwrap()
    }

    fn trace_kinds(trace: &[TraceEntry]) -> Vec<&'static str> {
        trace
            .iter()
            .map(|entry| match entry {
                TraceEntry::ModelCall { .. } => "model_call",
                TraceEntry::ToolCall { .. } => "tool_call",
                TraceEntry::ToolResult { .. } => "tool_result",
                TraceEntry::Error { .. } => "error",
            })
            .collect()
    }

    #[tokio::test]
    async fn direct_answer_completes_in_one_iteration() {
        let agent = agent_with(vec![ScriptedProvider::answer("4")]);

        let result = agent.run("What is 2+2?").await.unwrap();
        assert_eq!(result.answer, "4");
        assert_eq!(result.iterations, 1);
        assert_eq!(trace_kinds(&result.execution_trace), vec!["model_call"]);
        assert!(result.error.is_none());

        // Memory gained the task and exactly one assistant entry
        let replay = agent.memory().replay(None);
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[1].role, Role::Assistant);
        assert_eq!(replay[1].content, "4");
    }

    #[tokio::test]
    async fn tool_roundtrip_then_answer() {
        let script = vec![
            ScriptedProvider::tool_use(vec![ToolCall::new(
                "calculate",
                json!({"expression": "2+2"}),
            )]),
            ScriptedProvider::answer("2+2 = 4"),
        ];
        let agent = AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .tool(CalculatorTool)
            .build()
            .unwrap();

        let result = agent.run("Add two and two").await.unwrap();
        assert_eq!(result.iterations, 2);
        assert_eq!(
            trace_kinds(&result.execution_trace),
            vec!["model_call", "tool_call", "tool_result", "model_call"]
        );

        // Usage accumulated across both model calls
        assert_eq!(result.usage.unwrap().total_tokens, 30);

        // Tool exchange stayed in the working sequence, not memory
        let replay = agent.memory().replay(None);
        assert_eq!(replay.len(), 2);
        assert!(replay.iter().all(|m| m.role != Role::Tool));
    }

    #[tokio::test]
    async fn tool_call_pairing_invariant() {
        let script = vec![
            ScriptedProvider::tool_use(vec![
                ToolCall::new("calculate", json!({"expression": "1+1"})),
                ToolCall::new("calculate", json!({"expression": "3*3"})),
            ]),
            ScriptedProvider::answer("done"),
        ];
        let agent = AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .tool(CalculatorTool)
            .build()
            .unwrap();

        let result = agent.run("two sums").await.unwrap();
        let trace = &result.execution_trace;

        for (i, entry) in trace.iter().enumerate() {
            if let TraceEntry::ToolCall { iteration, tool, .. } = entry {
                match &trace[i + 1] {
                    TraceEntry::ToolResult {
                        iteration: result_iteration,
                        tool: result_tool,
                        ..
                    } => {
                        assert_eq!(iteration, result_iteration);
                        assert_eq!(tool, result_tool);
                    }
                    other => panic!("tool_call not followed by tool_result: {:?}", other),
                }
            }
        }
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_marker() {
        // Every reply asks for another tool round; budget of one iteration
        let script = vec![ScriptedProvider::tool_use(vec![ToolCall::new(
            "calculate",
            json!({"expression": "2+2"}),
        )])];
        let agent = AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .tool(CalculatorTool)
            .max_iterations(1)
            .build()
            .unwrap();

        let result = agent.run("loop forever").await.unwrap();
        assert!(result.exhausted());
        assert_eq!(result.iterations, 1);
        assert_eq!(result.error.as_deref(), Some(MAX_ITERATIONS_MARKER));
        assert!(!result.answer.is_empty());

        // No assistant entry committed
        let replay = agent.memory().replay(None);
        assert!(replay.iter().all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn tool_failure_is_contained_and_run_recovers() {
        let script = vec![
            ScriptedProvider::tool_use(vec![ToolCall::new("explode", json!({}))]),
            ScriptedProvider::answer("recovered"),
        ];
        let agent = AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .tool(ExplodingTool)
            .build()
            .unwrap();

        let result = agent.run("light the fuse").await.unwrap();
        assert_eq!(result.answer, "recovered");

        let error_payload = result
            .execution_trace
            .iter()
            .find_map(|entry| match entry {
                TraceEntry::ToolResult { result, .. } => result.get("error"),
                _ => None,
            })
            .expect("tool_result should carry an error payload");
        assert!(error_payload.as_str().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back_not_fatal() {
        let script = vec![
            ScriptedProvider::tool_use(vec![ToolCall::new("missing_tool", json!({}))]),
            ScriptedProvider::answer("ok"),
        ];
        let agent = agent_with(script);

        let result = agent.run("call a ghost").await.unwrap();
        assert_eq!(result.answer, "ok");

        let has_not_found = result.execution_trace.iter().any(|entry| {
            matches!(entry, TraceEntry::ToolResult { result, .. }
                if result["error"].as_str().is_some_and(|e| e.contains("not found")))
        });
        assert!(has_not_found);
    }

    #[tokio::test]
    async fn provider_failure_aborts_with_partial_trace() {
        let script = vec![
            ScriptedProvider::tool_use(vec![ToolCall::new(
                "calculate",
                json!({"expression": "2+2"}),
            )]),
            Err(AgentError::Provider("rate limit".into())),
        ];
        let agent = AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .tool(CalculatorTool)
            .build()
            .unwrap();

        let failure = agent.run("will fail").await.unwrap_err();
        assert!(matches!(failure.error, AgentError::Provider(_)));
        assert_eq!(failure.iterations, 2);
        assert_eq!(
            trace_kinds(&failure.execution_trace),
            vec!["model_call", "tool_call", "tool_result", "error"]
        );

        // No assistant entry committed on failure
        let replay = agent.memory().replay(None);
        assert!(replay.iter().all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn catalog_omitted_when_registry_empty() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedProvider::answer("hi"),
        ]));
        let agent = AgentBuilder::new().provider(provider.clone()).build().unwrap();

        agent.run("hello").await.unwrap();
        assert_eq!(*provider.catalog_sizes.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn cancellation_before_first_iteration() {
        let agent = agent_with(vec![ScriptedProvider::answer("never sent")]);
        let token = CancellationToken::new();
        token.cancel();

        let failure = agent.run_with_cancellation("task", &token).await.unwrap_err();
        assert!(matches!(failure.error, AgentError::Cancelled));
        assert_eq!(failure.iterations, 0);
    }

    #[tokio::test]
    async fn reset_clears_memory() {
        let agent = agent_with(vec![ScriptedProvider::answer("4")]);
        agent.run("What is 2+2?").await.unwrap();
        assert!(!agent.memory().is_empty());

        agent.reset();
        assert!(agent.memory().is_empty());
    }

    #[tokio::test]
    async fn iterations_never_exceed_configured_bound() {
        let script: Vec<Result<Completion>> = (0..10)
            .map(|_| {
                ScriptedProvider::tool_use(vec![ToolCall::new(
                    "calculate",
                    json!({"expression": "1+1"}),
                )])
            })
            .collect();
        let agent = AgentBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .tool(CalculatorTool)
            .max_iterations(3)
            .build()
            .unwrap();

        let result = agent.run("spin").await.unwrap();
        assert_eq!(result.iterations, 3);
        assert!(result.execution_trace.iter().all(|e| e.iteration() <= 3));
        assert!(result.execution_trace.iter().all(|e| e.iteration() >= 1));
    }

    #[test]
    fn builder_requires_provider() {
        assert!(AgentBuilder::new().build().is_err());
    }
}
