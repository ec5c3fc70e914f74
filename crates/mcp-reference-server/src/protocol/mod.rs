//! Protocol Layer
//!
//! Strict JSON-RPC 2.0 codec plus the protocol constants shared across the
//! crate. The transports feed raw bytes into [`parse_message`] /
//! [`parse_response`] and serialize outbound traffic with [`serialize`];
//! nothing outside this module touches partially validated JSON.

pub mod constants;
pub mod errors;
pub mod message;

pub use constants::{PROTOCOL_VERSION, error_codes, headers, methods, notifications, server_info};
pub use errors::JsonRpcError;
pub use message::{
    parse_message, parse_response, serialize, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ParsedMessage, ParsedResponse, RequestId,
};
