//! # agentry-runtime
//!
//! Runtime providers for the agentry system.
//!
//! ## Providers
//!
//! - **OpenAI** (default): any OpenAI-compatible chat-completions API,
//!   including native tool calling and SSE token streaming
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentry_runtime::openai::OpenAiProvider;
//!
//! let provider = OpenAiProvider::from_env()?;
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .build()?;
//! ```

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

// Re-export core types for convenience
pub use agentry_core::{
    Agent, AgentBuilder, AgentError, Message, ModelProvider, Result, Role, Tool, ToolRegistry,
};
