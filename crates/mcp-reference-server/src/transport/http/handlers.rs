//! HTTP Endpoint Handlers
//!
//! Handlers for the `/mcp` endpoint pair plus CORS preflight and the health
//! probe. Every framing failure maps to an HTTP status with an
//! `{"error": …}` JSON body; JSON-RPC level failures travel as JSON-RPC
//! error responses with status `200`.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

// Layer 3: Internal module imports
use crate::auth::middleware::{authorize_message, AuthContext};
use crate::auth::scope::ScopeManager;
use crate::dispatcher::Dispatcher;
use crate::protocol::{headers as mcp_headers, methods, parse_message, ParsedMessage, PROTOCOL_VERSION};
use crate::session::{Session, SessionManager};
use crate::transport::sse::SseManager;

use super::HttpTransportConfig;

/// Shared state for the transport's handlers.
#[derive(Clone)]
pub struct AppState {
    /// Transport configuration
    pub config: Arc<HttpTransportConfig>,
    /// Session store
    pub sessions: Arc<SessionManager>,
    /// SSE stream manager
    pub sse: Arc<SseManager>,
    /// Message dispatcher; absent means every request is a 500
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    /// Method scope policy, enforced before dispatch when an auth context
    /// is attached
    pub scope_manager: Option<Arc<ScopeManager>>,
}

/// CORS header values for the `/mcp` endpoint.
const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, MCP-Protocol-Version, MCP-Session-Id, Last-Event-Id";

/// Handle `POST /mcp`: inbound JSON-RPC.
pub async fn handle_post(State(state): State<AppState>, request: Request) -> Response {
    let (parts, raw_body) = request.into_parts();
    let headers = parts.headers;
    let auth_context = parts.extensions.get::<AuthContext>().cloned();

    if let Err(response) = check_origin(&state.config, &headers) {
        return response;
    }
    if let Err(response) = check_protocol_version(&headers) {
        return with_cors(response, &headers, &state.config);
    }
    if let Err(response) = check_content_type(&headers) {
        return with_cors(response, &headers, &state.config);
    }

    // Read at most one byte past the cap so oversize bodies are detected
    // without buffering them whole.
    let body = match axum::body::to_bytes(raw_body, state.config.max_body_bytes + 1).await {
        Ok(body) => body,
        Err(_) => {
            return with_cors(
                transport_error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!(
                        "request body exceeds {} byte limit",
                        state.config.max_body_bytes
                    ),
                ),
                &headers,
                &state.config,
            )
        }
    };
    if body.len() > state.config.max_body_bytes {
        return with_cors(
            transport_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "request body exceeds {} byte limit",
                    state.config.max_body_bytes
                ),
            ),
            &headers,
            &state.config,
        );
    }

    let Some(dispatcher) = state.dispatcher.clone() else {
        return with_cors(
            transport_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "no dispatcher configured".to_string(),
            ),
            &headers,
            &state.config,
        );
    };

    let parsed = parse_message(&body);

    // Unparseable bytes are a framing failure, not a JSON-RPC error.
    if let ParsedMessage::ParseError(error) = &parsed {
        return with_cors(
            transport_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {}", error.message)),
            &headers,
            &state.config,
        );
    }

    // Structurally invalid request objects get a JSON-RPC error response.
    if matches!(parsed, ParsedMessage::Invalid { .. }) {
        let response = parsed
            .into_error_response()
            .map(|r| Json(r).into_response())
            .unwrap_or_else(|| StatusCode::BAD_REQUEST.into_response());
        return with_cors(response, &headers, &state.config);
    }

    // Scope policy runs before dispatch; authorization errors short-circuit.
    if let (Some(scope_manager), Some(context)) = (&state.scope_manager, &auth_context) {
        if let Err(refusal) = authorize_message(scope_manager, context, &parsed) {
            return with_cors(refusal, &headers, &state.config);
        }
    }

    let is_notification = matches!(parsed, ParsedMessage::Notification(_));
    let is_initialize = matches!(
        &parsed,
        ParsedMessage::Request(request) if request.method == methods::INITIALIZE
    );

    let response = if state.config.stateless {
        let session = Session::stateless();
        dispatch(&dispatcher, &session, &parsed, is_notification).await
    } else if is_initialize {
        // Initialize routes without a session; one is created for it and
        // surfaced in the MCP-Session-Id response header on success.
        let session = match state.sessions.create_session() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session creation failed");
                return with_cors(
                    transport_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    &headers,
                    &state.config,
                );
            }
        };
        let session_id = session.id.clone();
        match dispatcher.dispatch(&session, &parsed).await {
            Some(jsonrpc) if jsonrpc.error.is_none() => {
                attach_session_header(Json(jsonrpc).into_response(), &session_id)
            }
            Some(jsonrpc) => {
                // Failed initialize: the session it would have created is
                // discarded and no session header is issued.
                state.sessions.destroy_session(&session_id);
                Json(jsonrpc).into_response()
            }
            None => {
                state.sessions.destroy_session(&session_id);
                transport_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "dispatcher produced no response for a request".to_string(),
                )
            }
        }
    } else {
        let session = match require_session(&state.sessions, &headers) {
            Ok(session) => session,
            Err(response) => return with_cors(response, &headers, &state.config),
        };
        let _ = state.sessions.touch_session(&session.id);
        dispatch(&dispatcher, &session, &parsed, is_notification).await
    };

    with_cors(response, &headers, &state.config)
}

/// Handle `GET /mcp`: the SSE event stream (stateful mode only).
pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.config.stateless {
        return transport_error(
            StatusCode::NOT_ACCEPTABLE,
            "SSE is not available in stateless mode".to_string(),
        );
    }
    if let Err(response) = check_origin(&state.config, &headers) {
        return response;
    }
    if let Err(response) = check_protocol_version(&headers) {
        return with_cors(response, &headers, &state.config);
    }

    let accepts_event_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/event-stream") || accept.contains("*/*"))
        .unwrap_or(false);
    if !accepts_event_stream {
        return with_cors(
            transport_error(
                StatusCode::NOT_ACCEPTABLE,
                "Accept must include text/event-stream".to_string(),
            ),
            &headers,
            &state.config,
        );
    }

    let session = match require_session(&state.sessions, &headers) {
        Ok(session) => session,
        Err(response) => return with_cors(response, &headers, &state.config),
    };
    let _ = state.sessions.touch_session(&session.id);

    let last_event_id = headers
        .get(mcp_headers::LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok());

    let (_stream, response) = match last_event_id {
        Some(last_event_id) => state.sse.handle_reconnect(&session.id, last_event_id).await,
        None => state.sse.create_stream(&session.id),
    };

    with_cors(response, &headers, &state.config)
}

/// Handle `OPTIONS /mcp`: CORS preflight.
pub async fn handle_preflight(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_origin(&state.config, &headers) {
        return response;
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    let out = response.headers_mut();
    if let Some(origin) = allowed_origin_value(&state.config, &headers) {
        out.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    insert_static(out, header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS);
    insert_static(out, header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS);
    insert_static(out, header::ACCESS_CONTROL_MAX_AGE, "3600");
    response
}

/// Health probe; bypasses authentication and sessions.
pub async fn handle_health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn dispatch(
    dispatcher: &Arc<dyn Dispatcher>,
    session: &Session,
    parsed: &ParsedMessage,
    is_notification: bool,
) -> Response {
    let response = dispatcher.dispatch(session, parsed).await;

    if is_notification {
        // Accepted; any lifecycle rejection was already logged.
        return StatusCode::ACCEPTED.into_response();
    }

    match response {
        Some(response) => Json(response).into_response(),
        None => transport_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dispatcher produced no response for a request".to_string(),
        ),
    }
}

fn require_session(
    sessions: &SessionManager,
    headers: &HeaderMap,
) -> Result<Session, Response> {
    let session_id = headers
        .get(mcp_headers::SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            transport_error(
                StatusCode::BAD_REQUEST,
                format!("missing {} header", mcp_headers::SESSION_ID),
            )
        })?;

    sessions.get_session(session_id).ok_or_else(|| {
        // 404, not 401: unknown session is not an authentication failure.
        transport_error(StatusCode::NOT_FOUND, "session not found".to_string())
    })
}

fn check_protocol_version(headers: &HeaderMap) -> Result<(), Response> {
    match headers
        .get(mcp_headers::PROTOCOL_VERSION)
        .and_then(|v| v.to_str().ok())
    {
        Some(PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(transport_error(
            StatusCode::BAD_REQUEST,
            format!(
                "unsupported {} header: {other} (supported: {PROTOCOL_VERSION})",
                mcp_headers::PROTOCOL_VERSION
            ),
        )),
        None => Err(transport_error(
            StatusCode::BAD_REQUEST,
            format!("missing {} header", mcp_headers::PROTOCOL_VERSION),
        )),
    }
}

fn check_content_type(headers: &HeaderMap) -> Result<(), Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if media_type == "application/json" || media_type.ends_with("+json") {
        Ok(())
    } else {
        Err(transport_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be application/json".to_string(),
        ))
    }
}

fn check_origin(config: &HttpTransportConfig, headers: &HeaderMap) -> Result<(), Response> {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if config.origin_allowed(origin) {
        Ok(())
    } else {
        // The allow-list itself is never echoed back.
        Err(transport_error(
            StatusCode::FORBIDDEN,
            "origin not allowed".to_string(),
        ))
    }
}

fn transport_error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn attach_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(mcp_headers::SESSION_ID, value);
    }
    response
}

fn allowed_origin_value(config: &HttpTransportConfig, headers: &HeaderMap) -> Option<HeaderValue> {
    let origin = headers.get(header::ORIGIN)?.to_str().ok()?;
    if config.origin_allowed(origin) {
        HeaderValue::from_str(origin).ok()
    } else {
        None
    }
}

fn with_cors(mut response: Response, headers: &HeaderMap, config: &HttpTransportConfig) -> Response {
    if let Some(origin) = allowed_origin_value(config, headers) {
        let out = response.headers_mut();
        out.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        insert_static(
            out,
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            mcp_headers::SESSION_ID,
        );
    }
    response
}

fn insert_static(headers: &mut HeaderMap, name: header::HeaderName, value: &'static str) {
    headers.insert(name, HeaderValue::from_static(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityManager;
    use crate::dispatcher::{EmptyToolRegistry, McpDispatcher};
    use crate::protocol::{JsonRpcMessage, JsonRpcNotification};
    use crate::session::SessionConfig;
    use crate::transport::http::HttpTransport;
    use crate::transport::sse::SseConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_config(stateless: bool) -> HttpTransportConfig {
        HttpTransportConfig {
            stateless,
            session: SessionConfig {
                sweep_interval: Duration::ZERO,
                ..Default::default()
            },
            sse: SseConfig {
                keep_alive_interval: None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn transport_with_config(config: HttpTransportConfig) -> HttpTransport {
        let transport = HttpTransport::new(config);
        let dispatcher = McpDispatcher::new(
            Arc::clone(transport.session_manager()),
            Arc::new(CapabilityManager::new(
                CapabilityManager::default_server_capabilities(),
            )),
            Arc::new(EmptyToolRegistry),
        );
        transport.with_dispatcher(Arc::new(dispatcher))
    }

    fn transport() -> HttpTransport {
        transport_with_config(test_config(false))
    }

    fn init_body() -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "roots": { "listChanged": true } },
                "clientInfo": { "name": "t", "version": "1" }
            }
        })
        .to_string()
    }

    fn post(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Content-Type", "application/json")
            .body(body.into())
            .unwrap()
    }

    fn post_with_session(body: impl Into<Body>, session_id: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Content-Type", "application/json")
            .header("MCP-Session-Id", session_id)
            .body(body.into())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Run the initialize request and return the issued session id.
    async fn initialize(transport: &HttpTransport) -> String {
        let response = transport.router().oneshot(post(init_body())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()["MCP-Session-Id"]
            .to_str()
            .unwrap()
            .to_string()
    }

    /// Full handshake: initialize plus the initialized notification.
    async fn handshake(transport: &HttpTransport) -> String {
        let session_id = initialize(transport).await;
        let note = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string();
        let response = transport
            .router()
            .oneshot(post_with_session(note, &session_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        session_id
    }

    #[tokio::test]
    async fn initialize_handshake_issues_session() {
        let transport = transport();
        let response = transport.router().oneshot(post(init_body())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("MCP-Session-Id"));

        let body = json_body(response).await;
        assert_eq!(body["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(body["result"]["serverInfo"]["name"], "mcp-reference-server");
        assert_eq!(body["result"]["capabilities"]["tools"]["listChanged"], true);
    }

    #[tokio::test]
    async fn failed_initialize_issues_no_session() {
        let transport = transport();
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "1999-01-01", "clientInfo": { "name": "t", "version": "1" } }
        })
        .to_string();

        let response = transport.router().oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // The error response carries no session header and no session remains.
        assert!(!response.headers().contains_key("MCP-Session-Id"));
        assert_eq!(transport.session_manager().session_count(), 0);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn pre_initialization_request_is_rejected() {
        let transport = transport();
        let session_id = initialize(&transport).await;

        // initialized notification not sent yet
        let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }).to_string();
        let response = transport
            .router()
            .oneshot(post_with_session(request, &session_id))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32600);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not initialized"));
    }

    #[tokio::test]
    async fn request_after_handshake_succeeds() {
        let transport = transport();
        let session_id = handshake(&transport).await;

        let request = json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }).to_string();
        let response = transport
            .router()
            .oneshot(post_with_session(request, &session_id))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["result"]["tools"], json!([]));
    }

    #[tokio::test]
    async fn missing_protocol_version_header() {
        let transport = transport();
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("Content-Type", "application/json")
            .body(Body::from(init_body()))
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("MCP-Protocol-Version"));
    }

    #[tokio::test]
    async fn wrong_protocol_version_header() {
        let transport = transport();
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("MCP-Protocol-Version", "2024-06-01")
            .header("Content-Type", "application/json")
            .body(Body::from(init_body()))
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_content_type() {
        let transport = transport();
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Content-Type", "text/plain")
            .body(Body::from(init_body()))
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn json_subtype_content_type_is_accepted() {
        let transport = transport();
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Content-Type", "application/json; charset=utf-8")
            .body(Body::from(init_body()))
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversize_body() {
        let mut config = test_config(false);
        config.max_body_bytes = 128;
        let transport = transport_with_config(config);

        let padding = "x".repeat(512);
        let body = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"ping","params":{{"pad":"{padding}"}}}}"#
        );
        let response = transport.router().oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn disallowed_origin() {
        let mut config = test_config(false);
        config.allowed_origins = vec!["https://allowed.example".to_string()];
        let transport = transport_with_config(config);

        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Content-Type", "application/json")
            .header("Origin", "https://evil.example")
            .body(Body::from(init_body()))
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        // The allow-list must not leak.
        assert!(!body["error"].as_str().unwrap().contains("allowed.example"));
    }

    #[tokio::test]
    async fn allowed_origin_is_echoed_with_exposed_headers() {
        let mut config = test_config(false);
        config.allowed_origins = vec!["https://allowed.example".to_string()];
        let transport = transport_with_config(config);

        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Content-Type", "application/json")
            .header("Origin", "https://allowed.example")
            .body(Body::from(init_body()))
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["Access-Control-Allow-Origin"],
            "https://allowed.example"
        );
        assert_eq!(
            response.headers()["Access-Control-Expose-Headers"],
            "MCP-Session-Id"
        );
    }

    #[tokio::test]
    async fn preflight_returns_no_content() {
        let transport = transport();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/mcp")
            .header("Origin", "https://app.example")
            .body(Body::empty())
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers()["Access-Control-Allow-Headers"]
            .to_str()
            .unwrap()
            .contains("MCP-Session-Id"));
        assert_eq!(
            response.headers()["Access-Control-Allow-Methods"],
            "GET, POST, OPTIONS"
        );
    }

    #[tokio::test]
    async fn unparseable_body_is_a_framing_error() {
        let transport = transport();
        let response = transport.router().oneshot(post("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body.get("error").unwrap().is_string());
        assert!(body.get("jsonrpc").is_none());
    }

    #[tokio::test]
    async fn invalid_request_object_is_a_jsonrpc_error() {
        let transport = transport();
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "m", "params": [1] }).to_string();
        let response = transport.router().oneshot(post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn missing_session_header() {
        let transport = transport();
        let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }).to_string();
        let response = transport.router().oneshot(post(request)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("MCP-Session-Id"));
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let transport = transport();
        let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }).to_string();
        let response = transport
            .router()
            .oneshot(post_with_session(request, "nope"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_is_accepted_with_empty_body() {
        let transport = transport();
        let session_id = handshake(&transport).await;

        let note = json!({ "jsonrpc": "2.0", "method": "notifications/whatever" }).to_string();
        let response = transport
            .router()
            .oneshot(post_with_session(note, &session_id))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn no_dispatcher_is_500() {
        let transport = HttpTransport::new(test_config(false));
        let response = transport.router().oneshot(post(init_body())).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn stateless_initialize_has_no_session_header() {
        let transport = transport_with_config(test_config(true));
        let response = transport.router().oneshot(post(init_body())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("MCP-Session-Id"));
        assert_eq!(transport.session_manager().session_count(), 0);

        let body = json_body(response).await;
        assert_eq!(body["result"]["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn stateless_request_needs_no_session() {
        let transport = transport_with_config(test_config(true));
        let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }).to_string();
        let response = transport.router().oneshot(post(request)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["result"], json!({}));
    }

    #[tokio::test]
    async fn stateless_get_is_refused() {
        let transport = transport_with_config(test_config(true));
        let request = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Accept", "text/event-stream")
            .body(Body::empty())
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("stateless mode"));
    }

    fn get_stream(session_id: &str, last_event_id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Accept", "text/event-stream")
            .header("MCP-Session-Id", session_id);
        if let Some(last_event_id) = last_event_id {
            builder = builder.header("Last-Event-Id", last_event_id);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn get_requires_event_stream_accept() {
        let transport = transport();
        let session_id = handshake(&transport).await;

        let request = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Accept", "application/json")
            .header("MCP-Session-Id", &session_id)
            .body(Body::empty())
            .unwrap();

        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn get_requires_session() {
        let transport = transport();

        let request = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .header("Accept", "text/event-stream")
            .body(Body::empty())
            .unwrap();
        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = transport
            .router()
            .oneshot(get_stream("nope", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_opens_event_stream() {
        let transport = transport();
        let session_id = handshake(&transport).await;

        let response = transport
            .router()
            .oneshot(get_stream(&session_id, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert!(transport.sse_manager().has_active_stream(&session_id));
    }

    #[tokio::test]
    async fn sse_reconnect_replays_missed_events() {
        let transport = transport();
        let session_id = handshake(&transport).await;

        // First stream; five notifications go out on it.
        let first = transport
            .router()
            .oneshot(get_stream(&session_id, None))
            .await
            .unwrap();
        for n in 1..=5u64 {
            let message = JsonRpcMessage::Notification(JsonRpcNotification::new(
                "notifications/message",
                Some(json!({ "n": n })),
            ));
            assert!(transport.sse_manager().send_event(&session_id, &message).await);
        }
        drop(first); // client went away after reading some prefix

        // Reconnect having last seen sequence 2.
        let reconnect = transport
            .router()
            .oneshot(get_stream(&session_id, Some(&format!("{session_id}:2"))))
            .await
            .unwrap();
        assert_eq!(reconnect.status(), StatusCode::OK);

        transport.sse_manager().close_stream(&session_id);
        let bytes = to_bytes(reconnect.into_body(), 1 << 20).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(!text.contains(&format!("id: {session_id}:1\n")));
        assert!(!text.contains(&format!("id: {session_id}:2\n")));
        for n in 3..=5u64 {
            assert!(text.contains(&format!("id: {session_id}:{n}\n")), "missing {n}");
        }
        let p3 = text.find(&format!("id: {session_id}:3")).unwrap();
        let p4 = text.find(&format!("id: {session_id}:4")).unwrap();
        let p5 = text.find(&format!("id: {session_id}:5")).unwrap();
        assert!(p3 < p4 && p4 < p5);
    }

    #[tokio::test]
    async fn health_endpoint() {
        let transport = transport();
        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = transport.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
