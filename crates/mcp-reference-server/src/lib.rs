//! MCP Reference Server
//!
//! A reference implementation of the MCP protocol (version `2025-11-25`)
//! built on a strict JSON-RPC 2.0 codec, a session-oriented streamable HTTP
//! transport with server-sent events, and an OAuth 2.1 protection layer.
//!
//! # Architecture
//!
//! The crate is organized in layers:
//!
//! - **Protocol Layer** (`protocol`): strict JSON-RPC 2.0 parsing, validation
//!   and serialization with the standard error codes
//! - **Lifecycle Layer** (`lifecycle`): the initialize handshake state machine
//!   that gates every pre-initialization message
//! - **Capability Layer** (`capabilities`): declared/negotiated capability maps
//!   and method gating
//! - **Session Layer** (`session`): opaque session identifiers, idle expiry and
//!   the background sweep
//! - **Transport Layer** (`transport`): the `/mcp` HTTP endpoint pair (JSON-RPC
//!   POST, SSE GET) with per-session event streams and resumable replay
//! - **Auth Layer** (`auth`): PKCE, the in-memory authorization server, the
//!   outbound OAuth client with refresh deduplication, scope policy, discovery
//!   metadata, the client-credentials (M2M) client and the bearer middleware
//!
//! # Quick Start
//!
//! ```rust
//! use mcp_reference_server::protocol::{parse_message, ParsedMessage};
//!
//! let bytes = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
//! match parse_message(bytes) {
//!     ParsedMessage::Request(req) => assert_eq!(req.method, "tools/list"),
//!     other => panic!("unexpected parse outcome: {other:?}"),
//! }
//! ```

pub mod auth;
pub mod capabilities;
pub mod config;
pub mod dispatcher;
pub mod lifecycle;
pub mod protocol;
pub mod session;
pub mod transport;

// Convenient re-exports of the types nearly every consumer touches.
pub use capabilities::CapabilityManager;
pub use dispatcher::{Dispatcher, McpDispatcher};
pub use lifecycle::{LifecycleManager, LifecycleState};
pub use protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use session::{Session, SessionManager, SessionState};
pub use transport::http::{HttpTransport, HttpTransportConfig};
pub use transport::sse::{SseManager, SseStream};
