//! Tool System
//!
//! Extensible tool framework for agent capabilities. Tools are registered
//! under a unique name and invoked by the execution loop; a failure inside a
//! capability is converted into a structured `{"error": …}` payload at the
//! registry boundary and never escapes into the run.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};

/// Tool invocation request from the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    pub arguments: HashMap<String, Value>,

    /// Optional call ID for pairing results on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ToolCall {
    /// Build a call from a JSON object of arguments. Non-object values
    /// produce an empty argument map.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }

    /// Attach a call ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Arguments as a JSON object value
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone().into_iter().collect())
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Tool definition schema (handed to the model as the tool catalog)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for the model catalog
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall) -> Result<Value>;

    /// Validate arguments before execution (optional)
    fn validate(&self, call: &ToolCall) -> Result<()> {
        let schema = self.schema();

        for param in &schema.parameters {
            if param.required && !call.arguments.contains_key(&param.name) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }

        Ok(())
    }
}

/// Registry for available tools, shareable across concurrent runs.
/// Re-registering a name replaces the prior binding.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        self.register_boxed(Arc::new(tool));
    }

    /// Register a boxed tool
    pub fn register_boxed(&self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        tracing::debug!(tool = %schema.name, "Registering tool");
        let mut tools = self.tools.write().expect("registry lock poisoned");
        tools.insert(schema.name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().expect("registry lock poisoned");
        tools.get(name).cloned()
    }

    /// Invoke a tool call, containing any failure. An unknown name, a
    /// validation failure or a capability error all come back as a
    /// `{"error": …}` payload fed to the conversation like normal output.
    pub async fn dispatch(&self, call: &ToolCall) -> Value {
        let Some(tool) = self.get(&call.name) else {
            return json!({ "error": format!("Tool '{}' not found", call.name) });
        };

        if let Err(e) = tool.validate(call) {
            return json!({ "error": e.to_string() });
        }

        match tool.execute(call).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                json!({ "error": e.to_string() })
            }
        }
    }

    /// Get all tool schemas (the catalog passed to the provider)
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let tools = self.tools.read().expect("registry lock poisoned");
        tools.values().map(|t| t.schema()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().expect("registry lock poisoned");
        tools.keys().cloned().collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().expect("registry lock poisoned").len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Clock tool - returns current UTC time
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "current_time".into(),
            description: "Get the current time in UTC".into(),
            parameters: vec![ParameterSchema::optional(
                "format",
                "string",
                "Output format: 'iso', 'unix' or 'human'",
            )],
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        let format = call
            .arguments
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("iso");

        let now = chrono::Utc::now();
        let timestamp = match format {
            "unix" => now.timestamp().to_string(),
            "human" => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
            _ => now.to_rfc3339(),
        };

        Ok(json!({ "timestamp": timestamp, "timezone": "UTC" }))
    }
}

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculate".into(),
            description: "Perform mathematical calculations".into(),
            parameters: vec![ParameterSchema::required(
                "expression",
                "string",
                "Mathematical expression to evaluate (e.g., '2 + 2', '10 * 5')",
            )],
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        let expr = call
            .arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ToolValidation("Missing expression".into()))?;

        let result = evaluate_expression(expr).map_err(AgentError::ToolFailed)?;
        Ok(json!({ "expression": expr, "result": result }))
    }
}

/// Simulated web search tool carried over from the original service;
/// a real backend slots in behind the same schema.
pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "search_web".into(),
            description: "Search the web for information".into(),
            parameters: vec![ParameterSchema::required(
                "query",
                "string",
                "The search query",
            )],
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        let query = call
            .arguments
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ToolValidation("Missing query".into()))?;

        Ok(json!({
            "query": query,
            "results": [
                { "title": "Result 1", "snippet": "This is a search result" },
                { "title": "Result 2", "snippet": "Another search result" },
            ],
        }))
    }
}

/// Recursive-descent arithmetic evaluator for the calculator tool.
/// Supports + - * / ^ and parentheses.
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let expr = expr.replace(' ', "");
    if expr.is_empty() {
        return Err("Empty expression".into());
    }

    // Innermost parentheses first
    if let Some(start) = expr.rfind('(') {
        let Some(end) = expr[start..].find(')') else {
            return Err("Unbalanced parentheses".into());
        };
        let inner = evaluate_expression(&expr[start + 1..start + end])?;
        let rewritten = format!("{}{}{}", &expr[..start], inner, &expr[start + end + 1..]);
        return evaluate_expression(&rewritten);
    }

    // Addition/subtraction, lowest precedence, rightmost split
    for (i, c) in expr.char_indices().rev() {
        if i > 0 && (c == '+' || c == '-') {
            // Skip unary signs and exponent markers like "1e-5"
            let prev = expr.as_bytes()[i - 1] as char;
            if prev.is_ascii_digit() || prev == ')' {
                let left = evaluate_expression(&expr[..i])?;
                let right = evaluate_expression(&expr[i + 1..])?;
                return Ok(if c == '+' { left + right } else { left - right });
            }
        }
    }

    // Multiplication/division
    for (i, c) in expr.char_indices().rev() {
        if c == '*' || c == '/' {
            let left = evaluate_expression(&expr[..i])?;
            let right = evaluate_expression(&expr[i + 1..])?;
            if c == '/' && right == 0.0 {
                return Err("Division by zero".into());
            }
            return Ok(if c == '*' { left * right } else { left / right });
        }
    }

    // Power
    if let Some(i) = expr.find('^') {
        let left = evaluate_expression(&expr[..i])?;
        let right = evaluate_expression(&expr[i + 1..])?;
        return Ok(left.powf(right));
    }

    expr.parse::<f64>().map_err(|e| format!("Parse error: {}", e))
}
