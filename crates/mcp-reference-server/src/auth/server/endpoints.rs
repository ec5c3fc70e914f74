//! Authorization Server Endpoints
//!
//! Axum handlers for `GET /authorize` and `POST /token` over the in-memory
//! store: the PKCE-bound authorization-code grant and the refresh grant
//! with optional rotation. Subject authentication is an external concern;
//! the authorize endpoint trusts the `subject` its caller resolved.
//!
//! Failures follow RFC 6749: client and redirect-URI problems are answered
//! directly with `400` JSON bodies, everything else redirects back to the
//! client with `error` (and `state`) query parameters.

// Layer 1: Standard library imports
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

// Layer 3: Internal module imports
use crate::auth::pkce;
use crate::auth::server::jwt::{AccessTokenRequest, JwtIssuer};
use crate::auth::server::store::{AuthorizationCode, OAuthStore, RefreshTokenEntry};

/// A client registration known to the authorization server.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    /// Client identifier
    pub client_id: String,
    /// Exact-match redirect URIs
    pub redirect_uris: Vec<String>,
}

/// Authorization server configuration.
#[derive(Debug, Clone)]
pub struct AuthorizationServerConfig {
    /// Registered clients
    pub clients: Vec<RegisteredClient>,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// Rotate refresh tokens on use (old token revoked)
    pub rotate_refresh_tokens: bool,
    /// Scope granted when the authorize request names none
    pub default_scope: String,
}

impl Default for AuthorizationServerConfig {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
            access_token_ttl: Duration::from_secs(3600),
            refresh_token_ttl: Duration::from_secs(86_400),
            rotate_refresh_tokens: true,
            default_scope: "mcp:read".to_string(),
        }
    }
}

/// Standard OAuth error body, returned with status 400.
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    /// RFC 6749 error code
    pub error: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

fn oauth_error(code: &str, description: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(OAuthErrorBody {
            error: code.to_string(),
            error_description: Some(description.into()),
        }),
    )
        .into_response()
}

/// Token endpoint success body.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// The in-process OAuth authorization server.
pub struct AuthorizationServer {
    store: Arc<OAuthStore>,
    jwt: Arc<JwtIssuer>,
    config: AuthorizationServerConfig,
    clients: HashMap<String, RegisteredClient>,
}

impl AuthorizationServer {
    /// Create a server over the given store and token issuer.
    pub fn new(
        store: Arc<OAuthStore>,
        jwt: Arc<JwtIssuer>,
        config: AuthorizationServerConfig,
    ) -> Self {
        let clients = config
            .clients
            .iter()
            .map(|c| (c.client_id.clone(), c.clone()))
            .collect();
        Self {
            store,
            jwt,
            config,
            clients,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<OAuthStore> {
        &self.store
    }

    /// The token issuer.
    pub fn jwt(&self) -> &Arc<JwtIssuer> {
        &self.jwt
    }

    /// Router exposing `/authorize` and `/token`.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/authorize", get(handle_authorize))
            .route("/token", post(handle_token))
            .with_state(Arc::clone(self))
    }

    fn client(&self, client_id: &str) -> Option<&RegisteredClient> {
        self.clients.get(client_id)
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

/// Query parameters for `GET /authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    /// Subject resolved by the operator's authentication layer.
    pub subject: Option<String>,
}

async fn handle_authorize(
    State(server): State<Arc<AuthorizationServer>>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    // Client and redirect URI must check out before anything is redirected.
    let Some(client_id) = params.client_id.as_deref() else {
        return oauth_error("invalid_request", "client_id is required");
    };
    let Some(client) = server.client(client_id) else {
        return oauth_error("invalid_client", "unknown client");
    };
    let Some(redirect_uri) = params.redirect_uri.as_deref() else {
        return oauth_error("invalid_request", "redirect_uri is required");
    };
    if !client.redirect_uris.iter().any(|u| u == redirect_uri) {
        return oauth_error("invalid_request", "redirect_uri is not registered");
    }

    let state = params.state.as_deref();
    if params.response_type.as_deref() != Some("code") {
        return error_redirect(redirect_uri, "unsupported_response_type", state);
    }
    let Some(code_challenge) = params.code_challenge.as_deref() else {
        return error_redirect(redirect_uri, "invalid_request", state);
    };
    if params.code_challenge_method.as_deref() != Some("S256") {
        return error_redirect(redirect_uri, "invalid_request", state);
    }

    let subject = params.subject.unwrap_or_else(|| "anonymous".to_string());
    let scope = params
        .scope
        .unwrap_or_else(|| server.config.default_scope.clone());

    let code = server.store.store_code(AuthorizationCode {
        client_id: client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        code_challenge: code_challenge.to_string(),
        code_challenge_method: "S256".to_string(),
        subject,
        scope,
        state: params.state.clone(),
    });
    debug!(client = client_id, "authorization code issued");

    let mut location = format!("{redirect_uri}?code={}", urlencoding::encode(&code));
    if let Some(state) = state {
        location.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    found_redirect(&location)
}

fn error_redirect(redirect_uri: &str, error: &str, state: Option<&str>) -> Response {
    let mut location = format!("{redirect_uri}?error={error}");
    if let Some(state) = state {
        location.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    found_redirect(&location)
}

/// RFC 6749 redirects use 302 Found.
fn found_redirect(location: &str) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

async fn handle_token(
    State(server): State<Arc<AuthorizationServer>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => handle_code_grant(&server, &form),
        Some("refresh_token") => handle_refresh_grant(&server, &form),
        Some(other) => oauth_error(
            "unsupported_grant_type",
            format!("unsupported grant_type: {other}"),
        ),
        None => oauth_error("invalid_request", "grant_type is required"),
    }
}

fn handle_code_grant(server: &AuthorizationServer, form: &HashMap<String, String>) -> Response {
    let Some(code) = form.get("code") else {
        return oauth_error("invalid_request", "code is required");
    };
    let Some(code_verifier) = form.get("code_verifier") else {
        return oauth_error("invalid_request", "code_verifier is required");
    };
    let Some(redirect_uri) = form.get("redirect_uri") else {
        return oauth_error("invalid_request", "redirect_uri is required");
    };

    // Single use: the entry is gone whether or not the rest succeeds.
    let Some(entry) = server.store.consume_code(code) else {
        return oauth_error("invalid_grant", "authorization code is invalid or expired");
    };

    if entry.redirect_uri != *redirect_uri {
        return oauth_error("invalid_grant", "redirect_uri does not match");
    }
    if let Some(client_id) = form.get("client_id") {
        if entry.client_id != *client_id {
            return oauth_error("invalid_client", "client_id does not match");
        }
    }

    match pkce::verify(code_verifier, &entry.code_challenge, &entry.code_challenge_method) {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            return oauth_error("invalid_grant", "PKCE verification failed");
        }
    }

    issue_tokens(server, &entry.client_id, &entry.subject, &entry.scope, true)
}

fn handle_refresh_grant(server: &AuthorizationServer, form: &HashMap<String, String>) -> Response {
    let Some(token) = form.get("refresh_token") else {
        return oauth_error("invalid_request", "refresh_token is required");
    };

    let Some(entry) = server.store.get_refresh(token) else {
        return oauth_error("invalid_grant", "refresh token is invalid or expired");
    };

    // Optional narrowing: a requested scope must be a subset of the grant.
    let scope = match form.get("scope") {
        Some(requested) => {
            let granted: HashSet<&str> = entry.scope.split_whitespace().collect();
            if !requested.split_whitespace().all(|s| granted.contains(s)) {
                return oauth_error("invalid_scope", "requested scope exceeds the original grant");
            }
            requested.clone()
        }
        None => entry.scope.clone(),
    };

    if server.config.rotate_refresh_tokens {
        server.store.revoke_refresh(token);
    }

    issue_tokens(
        server,
        &entry.client_id,
        &entry.subject,
        &scope,
        server.config.rotate_refresh_tokens,
    )
}

fn issue_tokens(
    server: &AuthorizationServer,
    client_id: &str,
    subject: &str,
    scope: &str,
    include_refresh: bool,
) -> Response {
    let access_token = match server.jwt.issue_access_token(
        &AccessTokenRequest {
            sub: subject.to_string(),
            aud: client_id.to_string(),
            scope: scope.to_string(),
        },
        server.config.access_token_ttl,
    ) {
        Ok(token) => token,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "server_error" })),
            )
                .into_response()
        }
    };

    let refresh_token = include_refresh.then(|| {
        server.store.store_refresh(
            RefreshTokenEntry {
                client_id: client_id.to_string(),
                subject: subject.to_string(),
                scope: scope.to_string(),
            },
            server.config.refresh_token_ttl,
        )
    });

    let body = TokenEndpointResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: server.config.access_token_ttl.as_secs(),
        refresh_token,
        scope: Some(scope.to_string()),
    };

    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}
