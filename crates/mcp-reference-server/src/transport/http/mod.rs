//! Streamable HTTP Transport
//!
//! Exposes `POST /mcp` for inbound JSON-RPC and `GET /mcp` for the SSE
//! event stream, with header validation, CORS, a body size cap and an
//! optional stateless mode. This module is the single place where typed
//! errors become HTTP status codes; framing failures are surfaced as
//! `{"error": …}` JSON bodies and never as JSON-RPC errors.

// Layer 1: Standard library imports
use std::net::SocketAddr;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use axum::routing::{any, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

// Layer 3: Internal module imports
use crate::auth::scope::ScopeManager;
use crate::dispatcher::Dispatcher;
use crate::session::{SessionConfig, SessionManager};
use crate::transport::sse::{SseConfig, SseManager};

mod handlers;

pub use handlers::AppState;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Endpoint path for both JSON-RPC and SSE
    pub endpoint_path: String,
    /// Stateless mode: no sessions, no SSE
    pub stateless: bool,
    /// Request body cap in bytes
    pub max_body_bytes: usize,
    /// Origin allow-list. Empty or containing `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Session store configuration
    pub session: SessionConfig,
    /// SSE stream configuration
    pub sse: SseConfig,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/mcp".to_string(),
            stateless: false,
            max_body_bytes: 100 * 1024, // 100 KB
            allowed_origins: Vec::new(),
            session: SessionConfig::default(),
            sse: SseConfig::default(),
        }
    }
}

impl HttpTransportConfig {
    /// Whether the given `Origin` header value passes the allow-list.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty()
            || self.allowed_origins.iter().any(|o| o == "*" || o == origin)
    }
}

/// The streamable HTTP transport: session store, SSE manager and router.
pub struct HttpTransport {
    config: Arc<HttpTransportConfig>,
    sessions: Arc<SessionManager>,
    sse: Arc<SseManager>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    scope_manager: Option<Arc<ScopeManager>>,
}

impl HttpTransport {
    /// Create a transport. Session destruction tears down the session's SSE
    /// state through a destroy hook.
    pub fn new(config: HttpTransportConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(config.session.clone()));
        let sse = Arc::new(SseManager::new(config.sse.clone()));

        let sse_hook = Arc::clone(&sse);
        sessions.add_destroy_hook(Box::new(move |session_id| {
            sse_hook.remove_session(session_id);
        }));

        Self {
            config: Arc::new(config),
            sessions,
            sse,
            dispatcher: None,
            scope_manager: None,
        }
    }

    /// Create a transport with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(HttpTransportConfig::default())
    }

    /// Attach the dispatcher. Per-session dispatch state is torn down on
    /// session destruction through a destroy hook.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let dispatch_hook = Arc::clone(&dispatcher);
        self.sessions.add_destroy_hook(Box::new(move |session_id| {
            dispatch_hook.remove_session(session_id);
        }));
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Attach a scope manager. When present, requests that carry an
    /// [`AuthContext`](crate::auth::middleware::AuthContext) are checked
    /// against the method scope policy before dispatch.
    pub fn with_scope_manager(mut self, scope_manager: Arc<ScopeManager>) -> Self {
        self.scope_manager = Some(scope_manager);
        self
    }

    /// The session store.
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The SSE manager.
    pub fn sse_manager(&self) -> &Arc<SseManager> {
        &self.sse
    }

    /// Build the axum router for this transport.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            sessions: Arc::clone(&self.sessions),
            sse: Arc::clone(&self.sse),
            dispatcher: self.dispatcher.clone(),
            scope_manager: self.scope_manager.clone(),
        };

        // The POST handler reads the body itself with the configured cap so
        // the 413 body stays JSON.
        Router::new()
            .route(
                &self.config.endpoint_path,
                post(handlers::handle_post)
                    .get(handlers::handle_get)
                    .options(handlers::handle_preflight),
            )
            .route("/health", any(handlers::handle_health))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }

    /// Bind and serve until the task is cancelled.
    pub async fn serve(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, stateless = self.config.stateless, "http transport listening");
        axum::serve(listener, self.router()).await
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}
