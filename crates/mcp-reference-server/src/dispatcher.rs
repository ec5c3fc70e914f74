//! Message Dispatcher
//!
//! The seam between the transports and the protocol machinery. The HTTP
//! transport hands every admissible message to a [`Dispatcher`]; the default
//! [`McpDispatcher`] wires the lifecycle state machine, the capability gate
//! and a pluggable [`ToolRegistry`] together.
//!
//! Tool execution failures never become JSON-RPC errors: they are embedded
//! in a successful response with `result.isError = true` and a textual
//! `result.content` describing the failure.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::capabilities::CapabilityManager;
use crate::lifecycle::LifecycleManager;
use crate::protocol::{
    methods, JsonRpcError, JsonRpcResponse, ParsedMessage, RequestId,
};
use crate::session::{Session, SessionManager, SessionState};

/// RFC 5424 logging levels accepted by `logging/setLevel`.
const LOG_LEVELS: &[&str] = &[
    "debug",
    "info",
    "notice",
    "warning",
    "error",
    "critical",
    "alert",
    "emergency",
];

/// A tool surfaced by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, also the suffix of its `tool:<name>` scope
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool arguments
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Errors surfaced by tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with the given name is registered
    #[error("unknown tool: {0}")]
    NotFound(String),

    /// The tool ran and failed; embedded in the result, not a JSON-RPC error
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// Registry of concrete tools. Implementations live outside the core; the
/// default registry is empty.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Tools to surface from `tools/list`.
    async fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Execute a tool by name.
    async fn call_tool(&self, name: &str, arguments: Option<&Value>) -> Result<Value, ToolError>;

    /// Completion values for `completion/complete`. The default returns an
    /// empty completion.
    async fn complete(&self, _reference: &Value, _argument: &Value) -> Value {
        json!({ "completion": { "values": [], "total": 0, "hasMore": false } })
    }
}

/// Registry with no tools; every call is unknown.
#[derive(Debug, Default)]
pub struct EmptyToolRegistry;

#[async_trait]
impl ToolRegistry for EmptyToolRegistry {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }

    async fn call_tool(&self, name: &str, _arguments: Option<&Value>) -> Result<Value, ToolError> {
        Err(ToolError::NotFound(name.to_string()))
    }
}

/// Transport-facing dispatch seam.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handle an admissible message for a session. Returns a response for
    /// requests and `None` for notifications.
    async fn dispatch(&self, session: &Session, message: &ParsedMessage)
        -> Option<JsonRpcResponse>;

    /// Tear down per-session dispatch state.
    fn remove_session(&self, session_id: &str);
}

/// Default dispatcher: lifecycle gating, capability gating, tool routing.
pub struct McpDispatcher {
    sessions: Arc<SessionManager>,
    capabilities: Arc<CapabilityManager>,
    tools: Arc<dyn ToolRegistry>,
    lifecycles: DashMap<String, Arc<LifecycleManager>>,
    log_levels: DashMap<String, String>,
    instructions: Option<String>,
}

impl McpDispatcher {
    /// Create a dispatcher over the given session store, capability map and
    /// tool registry.
    pub fn new(
        sessions: Arc<SessionManager>,
        capabilities: Arc<CapabilityManager>,
        tools: Arc<dyn ToolRegistry>,
    ) -> Self {
        Self {
            sessions,
            capabilities,
            tools,
            lifecycles: DashMap::new(),
            log_levels: DashMap::new(),
            instructions: None,
        }
    }

    /// Attach instructions surfaced from the initialize result.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// The session's configured minimum log level, if one was set.
    pub fn log_level(&self, session_id: &str) -> Option<String> {
        self.log_levels.get(session_id).map(|e| e.value().clone())
    }

    /// Whether a `notifications/message` at `level` should be emitted to
    /// the session. Sessions without a configured level receive everything.
    pub fn is_level_enabled(&self, session_id: &str, level: &str) -> bool {
        let Some(minimum) = self.log_level(session_id) else {
            return true;
        };
        match (severity(&minimum), severity(level)) {
            (Some(minimum), Some(level)) => level >= minimum,
            _ => true,
        }
    }

    fn lifecycle_for(&self, session_id: &str) -> Arc<LifecycleManager> {
        Arc::clone(
            self.lifecycles
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(self.new_lifecycle()))
                .value(),
        )
    }

    fn new_lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(
            self.capabilities.server_capabilities().clone(),
            self.instructions.clone(),
        )
    }

    async fn handle_request(
        &self,
        session: &Session,
        method: &str,
        params: Option<&Value>,
        id: RequestId,
    ) -> JsonRpcResponse {
        if let Err(error) = self.capabilities.validate_method_capability(method) {
            return JsonRpcResponse::error(error, Some(id));
        }

        let result = match method {
            methods::INITIALIZE => self.handle_initialize(session, params),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(json!({ "tools": self.tools.list_tools().await })),
            methods::TOOLS_CALL => self.handle_tools_call(params).await,
            methods::COMPLETION_COMPLETE => self.handle_completion(params).await,
            methods::LOGGING_SET_LEVEL => self.handle_set_level(session, params),
            methods::SERVER_SHUTDOWN => self.handle_shutdown(session),
            other => Err(JsonRpcError::method_not_found(other)),
        };

        match result {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::error(error, Some(id)),
        }
    }

    fn handle_initialize(
        &self,
        session: &Session,
        params: Option<&Value>,
    ) -> Result<Value, JsonRpcError> {
        let lifecycle = if session.is_stateless() {
            // Stateless requests do not carry handshake state between
            // requests; initialize runs against a fresh machine every time.
            Arc::new(self.new_lifecycle())
        } else {
            self.lifecycle_for(&session.id)
        };

        let result = lifecycle.handle_initialize(params)?;

        if !session.is_stateless() {
            let info = lifecycle.client_info().ok_or_else(|| {
                JsonRpcError::internal_error("client info missing after initialize")
            })?;
            let caps = lifecycle
                .client_capabilities()
                .unwrap_or_else(|| json!({}));
            self.capabilities.set_client_capabilities(caps.clone());
            if let Err(e) = self
                .sessions
                .set_client_info(&session.id, info, caps)
                .and_then(|()| self.sessions.update_state(&session.id, SessionState::Initializing))
            {
                warn!(session = %session.id, error = %e, "session store update failed");
            }
        }

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("tool name is required"))?;
        let arguments = params.get("arguments");

        match self.tools.call_tool(name, arguments).await {
            Ok(result) => Ok(result),
            Err(ToolError::NotFound(name)) => {
                Err(JsonRpcError::invalid_params(format!("unknown tool: {name}")))
            }
            Err(ToolError::Execution(detail)) => Ok(json!({
                "isError": true,
                "content": [{ "type": "text", "text": detail }]
            })),
        }
    }

    async fn handle_completion(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let reference = params
            .get("ref")
            .ok_or_else(|| JsonRpcError::invalid_params("ref is required"))?;
        let argument = params
            .get("argument")
            .ok_or_else(|| JsonRpcError::invalid_params("argument is required"))?;
        Ok(self.tools.complete(reference, argument).await)
    }

    fn handle_set_level(
        &self,
        session: &Session,
        params: Option<&Value>,
    ) -> Result<Value, JsonRpcError> {
        let level = params
            .and_then(|p| p.get("level"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("level is required"))?;

        if !LOG_LEVELS.contains(&level) {
            return Err(JsonRpcError::invalid_params(format!(
                "unknown logging level: {level}"
            )));
        }

        self.log_levels
            .insert(session.id.clone(), level.to_string());
        debug!(session = %session.id, level, "logging level set");
        Ok(json!({}))
    }

    fn handle_shutdown(&self, session: &Session) -> Result<Value, JsonRpcError> {
        let lifecycle = self.lifecycle_for(&session.id);
        let first = lifecycle.initiate_shutdown();
        if !session.is_stateless() {
            let _ = self
                .sessions
                .update_state(&session.id, SessionState::ShuttingDown);
        }
        Ok(json!({ "shuttingDown": true, "alreadyInProgress": !first }))
    }

    fn handle_notification(&self, session: &Session, method: &str) {
        match method {
            methods::INITIALIZED => {
                if session.is_stateless() {
                    return;
                }
                let lifecycle = self.lifecycle_for(&session.id);
                match lifecycle.handle_initialized() {
                    Ok(()) => {
                        let _ = self.sessions.update_state(&session.id, SessionState::Ready);
                    }
                    Err(e) => warn!(session = %session.id, error = %e, "initialized rejected"),
                }
            }
            other => debug!(session = %session.id, method = other, "notification ignored"),
        }
    }
}

#[async_trait]
impl Dispatcher for McpDispatcher {
    async fn dispatch(
        &self,
        session: &Session,
        message: &ParsedMessage,
    ) -> Option<JsonRpcResponse> {
        // Stateless requests run against an ephemeral ready pseudo-session;
        // the handshake gate does not apply.
        if !session.is_stateless() {
            let lifecycle = self.lifecycle_for(&session.id);
            if let Some(rejection) = lifecycle.check_pre_initialization(message) {
                return Some(rejection);
            }
        }

        match message {
            ParsedMessage::Request(request) => Some(
                self.handle_request(
                    session,
                    &request.method,
                    request.params.as_ref(),
                    request.id.clone(),
                )
                .await,
            ),
            ParsedMessage::Notification(notification) => {
                self.handle_notification(session, &notification.method);
                None
            }
            ParsedMessage::ParseError(_) | ParsedMessage::Invalid { .. } => {
                message.clone().into_error_response()
            }
        }
    }

    fn remove_session(&self, session_id: &str) {
        self.lifecycles.remove(session_id);
        self.log_levels.remove(session_id);
    }
}

impl std::fmt::Debug for McpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpDispatcher")
            .field("lifecycles", &self.lifecycles.len())
            .finish_non_exhaustive()
    }
}

/// RFC 5424 severity rank; higher is more severe.
fn severity(level: &str) -> Option<usize> {
    LOG_LEVELS.iter().position(|l| *l == level)
}
