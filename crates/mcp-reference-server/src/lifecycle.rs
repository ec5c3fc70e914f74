//! Lifecycle State Machine
//!
//! Tracks the initialize handshake for one session and gates every message
//! that arrives before the handshake completes. All operations here are
//! synchronous and perform no I/O; the transport consults the manager before
//! dispatch.
//!
//! ```text
//! uninitialized  --initialize request-->   initializing
//! initializing   --initialized notify-->   ready
//! (any)          --shutdown-->             shutting_down
//! (any)          --reset-->                uninitialized
//! ```

// Layer 1: Standard library imports
use std::sync::RwLock;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

// Layer 3: Internal module imports
use crate::protocol::{
    methods, server_info, JsonRpcError, JsonRpcResponse, ParsedMessage, RequestId,
    PROTOCOL_VERSION,
};

/// Handshake states for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No initialize request seen yet
    Uninitialized,
    /// Initialize accepted, awaiting the initialized notification
    Initializing,
    /// Handshake complete, all methods admissible
    Ready,
    /// Shutdown initiated, everything is refused
    ShuttingDown,
}

/// Client identity captured from the initialize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

/// Result payload returned from a successful `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Negotiated protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Declared server capability map
    pub capabilities: Value,
    /// Server identity
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    /// Optional usage instructions surfaced to the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Server identity block in the initialize result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

#[derive(Debug)]
struct LifecycleInner {
    state: LifecycleState,
    client_info: Option<ClientInfo>,
    client_capabilities: Option<Value>,
    shutdown_initiated: bool,
}

/// Per-session lifecycle manager.
///
/// Guarded by a `std::sync::RwLock`: every operation is a short critical
/// section with no suspension point inside.
#[derive(Debug)]
pub struct LifecycleManager {
    inner: RwLock<LifecycleInner>,
    server_capabilities: Value,
    instructions: Option<String>,
}

impl LifecycleManager {
    /// Create a manager in `Uninitialized` holding the declared server
    /// capability map and optional instructions.
    pub fn new(server_capabilities: Value, instructions: Option<String>) -> Self {
        Self {
            inner: RwLock::new(LifecycleInner {
                state: LifecycleState::Uninitialized,
                client_info: None,
                client_capabilities: None,
                shutdown_initiated: false,
            }),
            server_capabilities,
            instructions,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.read().state
    }

    /// Client info captured by `initialize`, if the handshake ran.
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.read().client_info.clone()
    }

    /// Client capability map captured by `initialize`, if the handshake ran.
    pub fn client_capabilities(&self) -> Option<Value> {
        self.read().client_capabilities.clone()
    }

    /// Handle an `initialize` request.
    ///
    /// Validates the params (exact protocol version, required client info),
    /// captures the client identity and capability map, and moves the state
    /// machine to `Initializing`.
    pub fn handle_initialize(&self, params: Option<&Value>) -> Result<InitializeResult, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;

        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("protocolVersion is required"))?;

        if protocol_version != PROTOCOL_VERSION {
            return Err(JsonRpcError::invalid_request_with_data(
                format!("unsupported protocol version: {protocol_version}"),
                json!({ "supported": PROTOCOL_VERSION, "received": protocol_version }),
            ));
        }

        let client_info: ClientInfo = params
            .get("clientInfo")
            .cloned()
            .and_then(|raw| serde_json::from_value(raw).ok())
            .ok_or_else(|| {
                JsonRpcError::invalid_params("clientInfo with name and version is required")
            })?;

        let client_capabilities = params
            .get("capabilities")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let mut inner = self.write();
        if inner.state != LifecycleState::Uninitialized {
            return Err(JsonRpcError::invalid_request(format!(
                "initialize is not allowed in state {:?}",
                inner.state
            )));
        }

        debug!(client = %client_info.name, "initialize accepted");
        inner.state = LifecycleState::Initializing;
        inner.client_info = Some(client_info);
        inner.client_capabilities = Some(client_capabilities);

        Ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.server_capabilities.clone(),
            server_info: ServerInfo {
                name: server_info::NAME.to_string(),
                version: server_info::VERSION.to_string(),
            },
            instructions: self.instructions.clone(),
        })
    }

    /// Handle the `initialized` notification; legal only in `Initializing`.
    pub fn handle_initialized(&self) -> Result<(), JsonRpcError> {
        let mut inner = self.write();
        if inner.state != LifecycleState::Initializing {
            return Err(JsonRpcError::invalid_request(format!(
                "initialized notification is not allowed in state {:?}",
                inner.state
            )));
        }
        inner.state = LifecycleState::Ready;
        debug!("session ready");
        Ok(())
    }

    /// Gate a parsed message against the current state.
    ///
    /// Returns the JSON-RPC error response refusing the message, or `None`
    /// when the message is admissible. Failed parses pass through: their
    /// error responses are produced by the codec, not here.
    pub fn check_pre_initialization(&self, message: &ParsedMessage) -> Option<JsonRpcResponse> {
        let (method, id) = match message {
            ParsedMessage::Request(req) => (req.method.as_str(), Some(req.id.clone())),
            ParsedMessage::Notification(note) => (note.method.as_str(), None),
            ParsedMessage::ParseError(_) | ParsedMessage::Invalid { .. } => return None,
        };

        let state = self.read().state;
        match state {
            LifecycleState::Ready => None,
            LifecycleState::Uninitialized => {
                if method == methods::INITIALIZE {
                    None
                } else {
                    Some(rejection(
                        format!("server not initialized: {method} is not allowed yet"),
                        id,
                    ))
                }
            }
            LifecycleState::Initializing => {
                if method == methods::INITIALIZED {
                    None
                } else {
                    Some(rejection(
                        format!("server not initialized: awaiting initialized notification, got {method}"),
                        id,
                    ))
                }
            }
            LifecycleState::ShuttingDown => Some(rejection(
                format!("server is shutting down: {method} refused"),
                id,
            )),
        }
    }

    /// Initiate shutdown. Idempotent: `true` on the first call, `false`
    /// thereafter.
    pub fn initiate_shutdown(&self) -> bool {
        let mut inner = self.write();
        if inner.shutdown_initiated {
            return false;
        }
        inner.shutdown_initiated = true;
        inner.state = LifecycleState::ShuttingDown;
        debug!("shutdown initiated");
        true
    }

    /// Reset to `Uninitialized`, clearing captured client state.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.state = LifecycleState::Uninitialized;
        inner.client_info = None;
        inner.client_capabilities = None;
        inner.shutdown_initiated = false;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LifecycleInner> {
        // Lock poisoning requires a panic inside a critical section; the
        // sections here contain no panicking code paths.
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LifecycleInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn rejection(message: String, id: Option<RequestId>) -> JsonRpcResponse {
    JsonRpcResponse::error(JsonRpcError::invalid_request(message), id)
}
