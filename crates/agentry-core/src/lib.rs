//! # agentry-core
//!
//! Autonomous agent execution core: a bounded reasoning loop over a
//! provider-agnostic LLM abstraction, a capability-table tool registry and
//! FIFO-bounded conversation memory, producing an auditable execution trace.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Agent                                │
//! │  ┌────────────┐  ┌────────────┐  ┌────────┐  ┌────────────┐  │
//! │  │ Execution  │──│    Tool    │  │ Memory │  │ModelProvider│ │
//! │  │   Loop     │  │  Registry  │  │ (FIFO) │  │ (boundary)  │ │
//! │  └────────────┘  └────────────┘  └────────┘  └────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `ModelProvider` trait is the only seam to a model backend; the loop
//! never crashes because a tool failed, and every step of a run lands in its
//! execution trace.

pub mod agent;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;
pub mod trace;

pub use agent::{Agent, AgentBuilder, AgentConfig, RunFailure, RunResult, MAX_ITERATIONS_MARKER};
pub use error::{AgentError, Result};
pub use memory::AgentMemory;
pub use message::{Message, Role};
pub use provider::{Completion, GenerationOptions, ModelProvider, ModelReply, TokenUsage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolSchema};
pub use trace::TraceEntry;
