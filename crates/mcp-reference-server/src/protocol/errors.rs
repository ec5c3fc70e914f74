//! JSON-RPC 2.0 Error Objects
//!
//! Structured error objects with the standard error codes plus constructors
//! for each code. The HTTP transport is the only layer that maps these onto
//! status codes; everywhere else they travel inside a `JsonRpcResponse`.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// Layer 3: Internal module imports
use super::constants::error_codes;

/// JSON-RPC 2.0 error object carried in the `error` member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code (standard codes are negative)
    pub code: i32,

    /// Short human-readable error description
    pub message: String,

    /// Optional structured error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error object with an arbitrary code.
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// `-32700` Parse error: the body was not valid JSON.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, detail, None)
    }

    /// `-32600` Invalid request: the JSON was not a valid request object.
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, detail, None)
    }

    /// `-32600` Invalid request with structured details.
    pub fn invalid_request_with_data(detail: impl Into<String>, data: Value) -> Self {
        Self::new(error_codes::INVALID_REQUEST, detail, Some(data))
    }

    /// `-32601` Method not found, carrying the offending method in `data`.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
            Some(json!({ "method": method })),
        )
    }

    /// `-32602` Invalid params.
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, detail, None)
    }

    /// `-32603` Internal error.
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, detail, None)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}
