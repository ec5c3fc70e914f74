//! End-to-end flows over the composed stack: bearer middleware, scope
//! policy, session lifecycle, dispatch and SSE.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::{middleware, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use mcp_reference_server::auth::middleware::{bearer_auth, AuthMiddlewareConfig, BearerAuth};
use mcp_reference_server::auth::scope::{ScopeManager, ScopeManagerConfig};
use mcp_reference_server::capabilities::CapabilityManager;
use mcp_reference_server::dispatcher::{EmptyToolRegistry, McpDispatcher};
use mcp_reference_server::protocol::PROTOCOL_VERSION;
use mcp_reference_server::session::SessionConfig;
use mcp_reference_server::transport::http::{HttpTransport, HttpTransportConfig};
use mcp_reference_server::transport::sse::SseConfig;

const METADATA_URL: &str = "https://mcp.example/.well-known/oauth-protected-resource";

/// Unsigned bearer token; the middleware decodes structurally.
fn bearer(scope: &str) -> String {
    let head = URL_SAFE_NO_PAD.encode(json!({ "alg": "HS256" }).to_string());
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "sub": "user-7",
            "exp": Utc::now().timestamp() + 600,
            "scope": scope
        })
        .to_string(),
    );
    format!("{head}.{payload}.c2ln")
}

/// The full stack: transport + dispatcher + scope policy behind the bearer
/// middleware.
fn protected_stack() -> (HttpTransport, Router) {
    let transport = HttpTransport::new(HttpTransportConfig {
        session: SessionConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        },
        sse: SseConfig {
            keep_alive_interval: None,
            ..Default::default()
        },
        ..Default::default()
    });

    let dispatcher = McpDispatcher::new(
        Arc::clone(transport.session_manager()),
        Arc::new(CapabilityManager::new(
            CapabilityManager::default_server_capabilities(),
        )),
        Arc::new(EmptyToolRegistry),
    );

    let scope_manager = ScopeManager::new(ScopeManagerConfig {
        resource_metadata_url: Some(METADATA_URL.to_string()),
        require_tool_scope: false,
        ..Default::default()
    });

    let transport = transport
        .with_dispatcher(Arc::new(dispatcher))
        .with_scope_manager(Arc::new(scope_manager));

    let auth = BearerAuth::new(AuthMiddlewareConfig {
        resource_metadata_url: Some(METADATA_URL.to_string()),
        ..Default::default()
    });
    let router = transport
        .router()
        .layer(middleware::from_fn_with_state(auth, bearer_auth));

    (transport, router)
}

fn post(body: String, token: &str, session_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("MCP-Protocol-Version", PROTOCOL_VERSION)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {token}"));
    if let Some(session_id) = session_id {
        builder = builder.header("MCP-Session-Id", session_id);
    }
    builder.body(Body::from(body)).unwrap()
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

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn handshake(router: &Router, token: &str) -> String {
    let response = router
        .clone()
        .oneshot(post(init_body(), token, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response.headers()["MCP-Session-Id"]
        .to_str()
        .unwrap()
        .to_string();

    let note = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string();
    let response = router
        .clone()
        .oneshot(post(note, token, Some(&session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    session_id
}

#[tokio::test]
async fn authenticated_handshake_and_read_access() {
    let (_transport, router) = protected_stack();
    let token = bearer("mcp:read");
    let session_id = handshake(&router, &token).await;

    let list = json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }).to_string();
    let response = router
        .oneshot(post(list, &token, Some(&session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["result"]["tools"], json!([]));
}

#[tokio::test]
async fn missing_bearer_is_401_with_challenge() {
    let (_transport, router) = protected_stack();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("MCP-Protocol-Version", PROTOCOL_VERSION)
        .header("Content-Type", "application/json")
        .body(Body::from(init_body()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.contains(&format!(r#"resource_metadata="{METADATA_URL}""#)));
}

#[tokio::test]
async fn insufficient_scope_is_403_with_conformant_challenge() {
    let (_transport, router) = protected_stack();
    let token = bearer("mcp:read");
    let session_id = handshake(&router, &token).await;

    let call = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": { "name": "echo" }
    })
    .to_string();
    let response = router
        .oneshot(post(call, &token, Some(&session_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.contains(r#"error="insufficient_scope""#));
    assert!(challenge.contains(r#"scope="mcp:write""#));

    let body = json_body(response).await;
    assert_eq!(body["required_scope"], "mcp:write");
    assert_eq!(body["error"], "insufficient_scope");
}

#[tokio::test]
async fn write_scope_admits_tool_calls() {
    let (_transport, router) = protected_stack();
    let token = bearer("mcp:write");
    let session_id = handshake(&router, &token).await;

    let call = json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": { "name": "echo" }
    })
    .to_string();
    let response = router
        .oneshot(post(call, &token, Some(&session_id)))
        .await
        .unwrap();

    // Authorized at the scope layer; the empty registry answers at the
    // JSON-RPC layer with invalid params.
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn admin_scope_inherits_down_to_read() {
    let (_transport, router) = protected_stack();
    let token = bearer("mcp:admin");
    let session_id = handshake(&router, &token).await;

    let list = json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/list" }).to_string();
    let response = router
        .oneshot(post(list, &token, Some(&session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn health_probe_bypasses_auth() {
    let (_transport, router) = protected_stack();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn server_events_reach_the_stream() {
    use mcp_reference_server::protocol::{JsonRpcMessage, JsonRpcNotification};

    let (transport, router) = protected_stack();
    let token = bearer("mcp:read");
    let session_id = handshake(&router, &token).await;

    let stream_request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header("MCP-Protocol-Version", PROTOCOL_VERSION)
        .header("Accept", "text/event-stream")
        .header("MCP-Session-Id", &session_id)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let stream_response = router.oneshot(stream_request).await.unwrap();
    assert_eq!(stream_response.status(), StatusCode::OK);

    let message = JsonRpcMessage::Notification(JsonRpcNotification::new(
        "notifications/tools/list_changed",
        None,
    ));
    assert!(transport.sse_manager().send_event(&session_id, &message).await);

    transport.sse_manager().close_stream(&session_id);
    let bytes = to_bytes(stream_response.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(&format!("id: {session_id}:1\n")));
    assert!(text.contains("notifications/tools/list_changed"));
}
