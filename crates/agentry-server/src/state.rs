//! Shared application state

use std::sync::Arc;

use agentry_core::ModelProvider;

use crate::config::ServerConfig;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    /// Model provider backend
    pub provider: Arc<dyn ModelProvider>,

    /// Server configuration
    pub config: Arc<ServerConfig>,
}
