//! JSON-RPC 2.0 Message Types and Strict Codec
//!
//! Message structures for the three JSON-RPC variants plus the validating
//! parse entry points the transports feed raw bytes into. Parsing is strict:
//! the version string must be exactly `"2.0"`, params must be a JSON object
//! (or absent), numeric request ids must be integral, and a response must
//! carry exactly one of `result` and `error`. Batch arrays are not supported.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Layer 3: Internal module imports
use super::errors::JsonRpcError;

/// Protocol version literal required on every message.
const JSONRPC_VERSION: &str = "2.0";

/// Request ID supporting string and integer formats.
///
/// The JSON-RPC 2.0 specification allows string, number or null ids; this
/// server accepts strings and non-fractional integers, and represents the
/// null case (parse-error responses only) as `Option<RequestId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String-based request identifier
    String(String),
    /// Integer request identifier
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

/// JSON-RPC 2.0 request: a method invocation expecting a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`
    pub jsonrpc: String,

    /// Name of the method to invoke
    pub method: String,

    /// Structured parameters (object) or absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Request identifier echoed in the response
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new request.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// JSON-RPC 2.0 notification: a method invocation with no response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`
    pub jsonrpc: String,

    /// Name of the notification method
    pub method: String,

    /// Structured parameters (object) or absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    // No `id` field: its absence is what makes this a notification.
}

impl JsonRpcNotification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response carrying exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: String,

    /// Successful result (mutually exclusive with `error`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object (mutually exclusive with `result`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,

    /// Request identifier; `None` only for parse-error responses
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    /// Create an error response. `id` is `None` only when the request id
    /// could not be recovered (parse errors).
    pub fn error(error: JsonRpcError, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Unified message for outbound serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request message
    Request(JsonRpcRequest),
    /// Notification message
    Notification(JsonRpcNotification),
    /// Response message
    Response(JsonRpcResponse),
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(value: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(value)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(value: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(value)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(value: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(value)
    }
}

/// Outcome of parsing inbound bytes.
///
/// The two failure variants are already shaped for the wire: `ParseError`
/// responds with a null id, `Invalid` echoes the request id when it could be
/// recovered from the malformed object.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// A well-formed request
    Request(JsonRpcRequest),
    /// A well-formed notification
    Notification(JsonRpcNotification),
    /// The bytes were not valid JSON
    ParseError(JsonRpcError),
    /// Valid JSON that is not a valid JSON-RPC request object
    Invalid {
        /// The `-32600` error describing the violation
        error: JsonRpcError,
        /// Request id, when one could be recovered
        id: Option<RequestId>,
    },
}

impl ParsedMessage {
    /// Convert a failed parse into the error response to send back, or
    /// `None` for the well-formed variants.
    pub fn into_error_response(self) -> Option<JsonRpcResponse> {
        match self {
            ParsedMessage::ParseError(error) => Some(JsonRpcResponse::error(error, None)),
            ParsedMessage::Invalid { error, id } => Some(JsonRpcResponse::error(error, id)),
            ParsedMessage::Request(_) | ParsedMessage::Notification(_) => None,
        }
    }
}

/// Outcome of parsing an inbound response (client side).
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    /// Success response with its result payload
    Success {
        /// Echoed request id
        id: RequestId,
        /// Result payload
        result: Value,
    },
    /// Error response
    Error {
        /// Echoed request id (`None` for parse-error responses)
        id: Option<RequestId>,
        /// The error object
        error: JsonRpcError,
    },
}

/// Parse inbound bytes into a request or notification, validating the
/// JSON-RPC 2.0 framing rules.
pub fn parse_message(bytes: &[u8]) -> ParsedMessage {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => return ParsedMessage::ParseError(JsonRpcError::parse_error(e.to_string())),
    };

    let object = match value {
        Value::Object(object) => object,
        Value::Array(_) => {
            return ParsedMessage::Invalid {
                error: JsonRpcError::invalid_request("batch messages are not supported"),
                id: None,
            }
        }
        _ => {
            return ParsedMessage::Invalid {
                error: JsonRpcError::invalid_request("message must be a JSON object"),
                id: None,
            }
        }
    };

    let id = recover_id(&object);

    if let Err(detail) = check_version(&object) {
        return ParsedMessage::Invalid {
            error: JsonRpcError::invalid_request(detail),
            id,
        };
    }

    let method = match object.get("method").and_then(Value::as_str) {
        Some(method) if !method.is_empty() => method.to_string(),
        _ => {
            return ParsedMessage::Invalid {
                error: JsonRpcError::invalid_request("method must be a non-empty string"),
                id,
            }
        }
    };

    let params = match object.get("params") {
        None | Some(Value::Null) => None,
        Some(params @ Value::Object(_)) => Some(params.clone()),
        Some(_) => {
            return ParsedMessage::Invalid {
                error: JsonRpcError::invalid_request("params must be a JSON object when present"),
                id,
            }
        }
    };

    match object.get("id") {
        None => ParsedMessage::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params,
        }),
        Some(raw) => match validate_id(raw) {
            Ok(id) => ParsedMessage::Request(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params,
                id,
            }),
            Err(detail) => ParsedMessage::Invalid {
                error: JsonRpcError::invalid_request(detail),
                id: None,
            },
        },
    }
}

/// Parse inbound bytes into a success or error response.
pub fn parse_response(bytes: &[u8]) -> Result<ParsedResponse, JsonRpcError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| JsonRpcError::parse_error(e.to_string()))?;

    let object = match value {
        Value::Object(object) => object,
        _ => return Err(JsonRpcError::invalid_request("response must be a JSON object")),
    };

    check_version(&object).map_err(JsonRpcError::invalid_request)?;

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(validate_id(raw).map_err(JsonRpcError::invalid_request)?),
    };

    match (object.get("result"), object.get("error")) {
        (Some(_), Some(_)) => Err(JsonRpcError::invalid_request(
            "response carries both result and error",
        )),
        (None, None) => Err(JsonRpcError::invalid_request(
            "response carries neither result nor error",
        )),
        (Some(result), None) => {
            let id = id.ok_or_else(|| {
                JsonRpcError::invalid_request("success response requires a non-null id")
            })?;
            Ok(ParsedResponse::Success {
                id,
                result: result.clone(),
            })
        }
        (None, Some(raw_error)) => {
            let error: JsonRpcError = serde_json::from_value(raw_error.clone())
                .map_err(|e| JsonRpcError::invalid_request(format!("malformed error object: {e}")))?;
            Ok(ParsedResponse::Error { id, error })
        }
    }
}

/// Serialize a message for the wire.
pub fn serialize(message: &JsonRpcMessage) -> Result<Vec<u8>, JsonRpcError> {
    serde_json::to_vec(message).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

fn check_version(object: &Map<String, Value>) -> Result<(), String> {
    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => Ok(()),
        Some(other) => Err(format!("unsupported jsonrpc version: {other}")),
        None => Err("missing jsonrpc version".to_string()),
    }
}

/// Best-effort id recovery for error responses on malformed objects.
fn recover_id(object: &Map<String, Value>) -> Option<RequestId> {
    object.get("id").and_then(|raw| validate_id(raw).ok())
}

fn validate_id(raw: &Value) -> Result<RequestId, String> {
    match raw {
        Value::String(s) => Ok(RequestId::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| "id must be an integer or string".to_string()),
        _ => Err("id must be an integer or string".to_string()),
    }
}
