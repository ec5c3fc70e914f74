//! Transport Layer
//!
//! The streamable HTTP transport (`/mcp` POST for JSON-RPC, GET for SSE)
//! and the per-session SSE stream machinery. The standard-stream transport
//! is an external collaborator: it frames lines and feeds the same codec.

pub mod http;
pub mod sse;
