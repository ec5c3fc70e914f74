//! Protocol Constants
//!
//! Method names, error codes and default values shared across the crate.

/// Protocol version implemented by this server.
pub const PROTOCOL_VERSION: &str = "2025-11-25";

/// Server identity reported from the `initialize` handshake.
pub mod server_info {
    /// Server name as published in `serverInfo.name`.
    pub const NAME: &str = "mcp-reference-server";
    /// Server version as published in `serverInfo.version`.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// MCP protocol method names
pub mod methods {
    /// Initialization request
    pub const INITIALIZE: &str = "initialize";
    /// Initialized notification (sent by the client after `initialize`)
    pub const INITIALIZED: &str = "notifications/initialized";

    /// Tool-related methods
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";

    /// Resource-related methods
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

    /// Prompt-related methods
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";

    /// Completion method
    pub const COMPLETION_COMPLETE: &str = "completion/complete";

    /// Logging configuration
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

    /// Connectivity testing method
    pub const PING: &str = "ping";

    /// Administrative shutdown
    pub const SERVER_SHUTDOWN: &str = "server/shutdown";
}

/// Server-originated notification names, gated on client capabilities.
pub mod notifications {
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/listChanged";
    pub const MESSAGE: &str = "notifications/message";
}

/// JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Parse error - Invalid JSON was received by the server
    pub const PARSE_ERROR: i32 = -32700;

    /// Invalid Request - The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// Method not found - The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid params - Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal error - Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Transport header names
pub mod headers {
    /// Protocol version header required on every HTTP request.
    pub const PROTOCOL_VERSION: &str = "MCP-Protocol-Version";
    /// Session correlation header issued by `initialize` and required after.
    pub const SESSION_ID: &str = "MCP-Session-Id";
    /// SSE resumption header.
    pub const LAST_EVENT_ID: &str = "Last-Event-Id";
}
