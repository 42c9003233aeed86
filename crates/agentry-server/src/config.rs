//! Server configuration from environment variables

use agentry_core::error::{AgentError, Result};

/// Upper bound a request may set for agent iterations
pub const MAX_ITERATIONS_LIMIT: u32 = 20;

/// Environment-driven server settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,

    /// Allowed CORS origins; `*` means any
    pub cors_origins: Vec<String>,

    /// API key clients must present; `None` disables key comparison
    /// (header format is still enforced)
    pub api_key: Option<String>,

    /// Default model for chat, completion and agent requests
    pub model: String,

    /// Default agent iteration budget
    pub agent_max_iterations: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".into(),
            cors_origins: vec!["http://localhost:3000".into()],
            api_key: None,
            model: "gpt-4.1-mini".into(),
            agent_max_iterations: 10,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let agent_max_iterations = match std::env::var("AGENT_MAX_ITERATIONS") {
            Ok(raw) => raw
                .parse::<u32>()
                .map_err(|_| AgentError::Config(format!("invalid AGENT_MAX_ITERATIONS: {raw}")))?,
            Err(_) => defaults.agent_max_iterations,
        };
        if agent_max_iterations == 0 || agent_max_iterations > MAX_ITERATIONS_LIMIT {
            return Err(AgentError::Config(format!(
                "AGENT_MAX_ITERATIONS must be between 1 and {MAX_ITERATIONS_LIMIT}"
            )));
        }

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            cors_origins: std::env::var("CORS_ORIGIN")
                .map(|raw| parse_origins(&raw))
                .unwrap_or(defaults.cors_origins),
            api_key: std::env::var("AGENT_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.model),
            agent_max_iterations,
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.agent_max_iterations, 10);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_parse_origins() {
        let origins = parse_origins("http://a.example, http://b.example ,");
        assert_eq!(origins, vec!["http://a.example", "http://b.example"]);
    }
}
