//! Bearer Auth Middleware
//!
//! Extracts the bearer token, decodes the JWT payload structurally (no
//! signature verification at this layer; that is the JWKS verifier's job
//! when configured), enforces expiration with a clock-skew tolerance and
//! attaches an [`AuthContext`] to the request. A skip-list of paths (the
//! health probe by default) bypasses the middleware entirely, and an
//! explicit allow-unauthenticated mode passes missing tokens through.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

// Layer 3: Internal module imports
use crate::auth::discovery::create_401_response;
use crate::auth::scope::{ScopeManager, ScopeConfigError};
use crate::protocol::{methods, ParsedMessage};

/// Authenticated request context attached to request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Subject claim, when present
    pub sub: Option<String>,
    /// Expiration claim, when present
    pub exp: Option<i64>,
    /// Parsed scopes from the `scope` claim
    pub scopes: Vec<String>,
    /// The raw bearer token
    pub token: String,
}

/// Middleware configuration.
#[derive(Debug, Clone)]
pub struct AuthMiddlewareConfig {
    /// Pass requests without a token through instead of refusing them
    pub allow_unauthenticated: bool,
    /// Exact-match paths that bypass the middleware
    pub skip_paths: Vec<String>,
    /// RFC 9728 metadata URL advertised on 401 challenges
    pub resource_metadata_url: Option<String>,
    /// Tolerated clock skew when enforcing `exp`
    pub clock_skew: Duration,
}

impl Default for AuthMiddlewareConfig {
    fn default() -> Self {
        Self {
            allow_unauthenticated: false,
            skip_paths: vec!["/health".to_string()],
            resource_metadata_url: None,
            clock_skew: Duration::from_secs(60),
        }
    }
}

/// State for [`bearer_auth`]; wire with
/// `axum::middleware::from_fn_with_state`.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    config: AuthMiddlewareConfig,
}

impl BearerAuth {
    /// Create middleware state.
    pub fn new(config: AuthMiddlewareConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }

    fn unauthorized(&self, description: &str) -> Response {
        create_401_response(
            self.config.resource_metadata_url.as_deref(),
            Some("invalid_token"),
            Some(description),
        )
    }
}

/// The middleware function.
pub async fn bearer_auth(
    State(auth): State<Arc<BearerAuth>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if auth.config.skip_paths.iter().any(|p| p == &path) {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(header_value) = header_value else {
        if auth.config.allow_unauthenticated {
            return next.run(request).await;
        }
        return create_401_response(
            auth.config.resource_metadata_url.as_deref(),
            None,
            None,
        );
    };

    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return auth.unauthorized("authorization header is not a bearer token");
    };

    let claims = match decode_payload(token) {
        Ok(claims) => claims,
        Err(detail) => {
            debug!(detail, "bearer token rejected");
            return auth.unauthorized("malformed bearer token");
        }
    };

    let exp = claims.get("exp").and_then(Value::as_i64);
    if let Some(exp) = exp {
        let now = Utc::now().timestamp();
        if exp + auth.config.clock_skew.as_secs() as i64 <= now {
            return auth.unauthorized("token expired");
        }
    }

    let scopes = claims
        .get("scope")
        .and_then(Value::as_str)
        .map(ScopeManager::parse_scopes)
        .unwrap_or_default();

    let token = token.to_string();
    let sub = claims
        .get("sub")
        .and_then(Value::as_str)
        .map(str::to_string);

    request.extensions_mut().insert(AuthContext {
        sub,
        exp,
        scopes,
        token,
    });

    next.run(request).await
}

/// Structural payload decode: split the compact serialization and base64url
/// decode the claims segment. No signature check here.
fn decode_payload(token: &str) -> Result<Value, &'static str> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err("token is not a three-segment jwt");
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| "payload is not base64url")?;
    serde_json::from_slice(&bytes).map_err(|_| "payload is not json")
}

/// Enforce the scope policy for a parsed JSON-RPC message before dispatch.
///
/// For `tools/call` the tool name is lifted from the params so the
/// tool-specific scope applies. Returns the ready-made 403 on refusal.
pub fn authorize_message(
    scope_manager: &ScopeManager,
    context: &AuthContext,
    message: &ParsedMessage,
) -> Result<(), Response> {
    let (method, params) = match message {
        ParsedMessage::Request(request) => (request.method.as_str(), request.params.as_ref()),
        ParsedMessage::Notification(note) => (note.method.as_str(), note.params.as_ref()),
        _ => return Ok(()),
    };

    let tool_name = (method == methods::TOOLS_CALL)
        .then(|| params.and_then(|p| p.get("name")).and_then(Value::as_str))
        .flatten();

    match scope_manager.validate_method_access(&context.scopes, method, tool_name) {
        Ok(()) => Ok(()),
        Err(error) => match scope_manager.build_403_response(&error) {
            Ok(response) => Err(response),
            Err(ScopeConfigError::MissingResourceMetadataUrl) => {
                // Without a metadata URL there is no conformant challenge;
                // fall back to a bare 401-style refusal.
                Err(create_401_response(
                    None,
                    Some("insufficient_scope"),
                    Some(&error.message),
                ))
            }
        },
    }
}
