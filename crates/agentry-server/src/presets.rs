//! Pre-configured agent profiles for the `/api/v1/agent/run` endpoint

use std::sync::Arc;

use agentry_core::agent::{Agent, AgentBuilder};
use agentry_core::provider::GenerationOptions;
use agentry_core::tool::{CalculatorTool, ClockTool, ToolRegistry, WebSearchTool};
use agentry_core::{ModelProvider, Result};

/// Agent profile selected per request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentKind {
    General,
    Researcher,
    Analyst,
}

impl AgentKind {
    /// Parse the request's `agent_type` field
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "general" => Some(Self::General),
            "researcher" => Some(Self::Researcher),
            "analyst" => Some(Self::Analyst),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::General => "General Assistant",
            Self::Researcher => "Research Agent",
            Self::Analyst => "Data Analyst",
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            Self::General => {
                "You are a helpful AI assistant. Use the available tools to help \
                 answer questions and complete tasks."
            }
            Self::Researcher => {
                "You are a research assistant. Use web search and analysis tools \
                 to find and synthesize information."
            }
            Self::Analyst => {
                "You are a data analyst. Use calculation and analysis tools to \
                 process data and provide insights."
            }
        }
    }

    fn tools(self) -> ToolRegistry {
        let registry = ToolRegistry::new();
        match self {
            Self::General => {
                registry.register(CalculatorTool);
                registry.register(ClockTool);
            }
            Self::Researcher => {
                registry.register(WebSearchTool);
                registry.register(CalculatorTool);
            }
            Self::Analyst => {
                registry.register(CalculatorTool);
            }
        }
        registry
    }
}

/// Build a fresh agent for one run
pub fn build_agent(
    kind: AgentKind,
    provider: Arc<dyn ModelProvider>,
    generation: GenerationOptions,
    max_iterations: u32,
) -> Result<Agent> {
    AgentBuilder::new()
        .name(kind.name())
        .provider(provider)
        .tools(Arc::new(kind.tools()))
        .system_prompt(kind.system_prompt())
        .max_iterations(max_iterations)
        .model(generation.model)
        .temperature(generation.temperature)
        .build()
}
