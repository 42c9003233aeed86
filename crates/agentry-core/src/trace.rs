//! Execution Trace
//!
//! Append-only audit log of one agent run's internal steps. Owned by the run
//! that produced it and handed back to the caller with the result; never
//! persisted by the core.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::FinishReason;

/// One step in an agent run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEntry {
    /// The loop queried the model adapter
    ModelCall {
        iteration: u32,
        finish_reason: FinishReason,
    },

    /// The model requested a tool invocation
    ToolCall {
        iteration: u32,
        tool: String,
        arguments: Value,
    },

    /// A tool invocation completed; `result` is the tool output or a
    /// structured `{"error": …}` payload
    ToolResult {
        iteration: u32,
        tool: String,
        result: Value,
    },

    /// A fatal error terminated the run
    Error { iteration: u32, error: String },
}

impl TraceEntry {
    pub fn model_call(iteration: u32, finish_reason: FinishReason) -> Self {
        Self::ModelCall {
            iteration,
            finish_reason,
        }
    }

    pub fn tool_call(iteration: u32, tool: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            iteration,
            tool: tool.into(),
            arguments,
        }
    }

    pub fn tool_result(iteration: u32, tool: impl Into<String>, result: Value) -> Self {
        Self::ToolResult {
            iteration,
            tool: tool.into(),
            result,
        }
    }

    pub fn error(iteration: u32, error: impl Into<String>) -> Self {
        Self::Error {
            iteration,
            error: error.into(),
        }
    }

    /// Iteration this entry belongs to
    pub fn iteration(&self) -> u32 {
        match self {
            Self::ModelCall { iteration, .. }
            | Self::ToolCall { iteration, .. }
            | Self::ToolResult { iteration, .. }
            | Self::Error { iteration, .. } => *iteration,
        }
    }
}
