//! Server Configuration
//!
//! The composition root: validated server-wide settings and the wiring of
//! session store, capability manager, dispatcher and HTTP transport.
//! Loading values from the environment is the caller's concern; this module
//! only validates and assembles.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde_json::Value;
use thiserror::Error;

// Layer 3: Internal module imports
use crate::capabilities::CapabilityManager;
use crate::dispatcher::{EmptyToolRegistry, McpDispatcher, ToolRegistry};
use crate::transport::http::{HttpTransport, HttpTransportConfig};

/// Minimum length for the pagination-cursor HMAC secret.
const MIN_CURSOR_SECRET_BYTES: usize = 32;

/// Configuration validation failures. Validation fails closed: a server is
/// never built from an invalid configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The cursor HMAC secret is too short to be safe
    #[error("cursor HMAC secret must be at least {MIN_CURSOR_SECRET_BYTES} bytes, got {0}")]
    CursorSecretTooShort(usize),
}

/// Server-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP transport settings
    pub http: HttpTransportConfig,
    /// Declared server capability map
    pub capabilities: Value,
    /// Instructions surfaced from the initialize result
    pub instructions: Option<String>,
    /// Secret for the (external) pagination cursor codec. Length is
    /// verified here at startup; the codec itself lives outside the core.
    pub cursor_hmac_secret: Option<Vec<u8>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http: HttpTransportConfig::default(),
            capabilities: CapabilityManager::default_server_capabilities(),
            instructions: None,
            cursor_hmac_secret: None,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secret) = &self.cursor_hmac_secret {
            if secret.len() < MIN_CURSOR_SECRET_BYTES {
                return Err(ConfigError::CursorSecretTooShort(secret.len()));
            }
        }
        Ok(())
    }
}

/// Build a fully wired HTTP server: session store, SSE manager, capability
/// manager and dispatcher over the given tool registry.
pub fn build_http_server(
    config: ServerConfig,
    tools: Arc<dyn ToolRegistry>,
) -> Result<HttpTransport, ConfigError> {
    config.validate()?;

    let transport = HttpTransport::new(config.http.clone());
    let capabilities = Arc::new(CapabilityManager::new(config.capabilities.clone()));

    let mut dispatcher = McpDispatcher::new(
        Arc::clone(transport.session_manager()),
        capabilities,
        tools,
    );
    if let Some(instructions) = &config.instructions {
        dispatcher = dispatcher.with_instructions(instructions.clone());
    }

    Ok(transport.with_dispatcher(Arc::new(dispatcher)))
}

/// Build a server with no registered tools.
pub fn build_default_http_server(config: ServerConfig) -> Result<HttpTransport, ConfigError> {
    build_http_server(config, Arc::new(EmptyToolRegistry))
}
