//! Discovery Metadata
//!
//! RFC 8414 authorization-server metadata and RFC 9728 protected-resource
//! metadata builders, `WWW-Authenticate` helpers and the `/.well-known`
//! handlers. The well-known documents are served with
//! `Cache-Control: public, max-age=3600`.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{extract::State, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Discovery configuration failures.
#[derive(Debug, Error, PartialEq)]
pub enum DiscoveryError {
    /// Protected-resource metadata needs a resource URL
    #[error("resource_url is required")]
    MissingResourceUrl,

    /// Protected-resource metadata needs at least one authorization server
    #[error("at least one authorization server is required")]
    MissingAuthorizationServers,
}

/// RFC 8414 authorization server metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// Build RFC 8414 metadata for an issuer.
pub fn build_oauth_server_metadata(issuer: &str) -> AuthorizationServerMetadata {
    let issuer = issuer.trim_end_matches('/');
    AuthorizationServerMetadata {
        issuer: issuer.to_string(),
        authorization_endpoint: format!("{issuer}/authorize"),
        token_endpoint: format!("{issuer}/token"),
        response_types_supported: vec!["code".to_string()],
        code_challenge_methods_supported: vec!["S256".to_string()],
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
            "client_credentials".to_string(),
        ],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
            "none".to_string(),
        ],
    }
}

/// Inputs for RFC 9728 protected-resource metadata.
///
/// `None` for the optional lists selects the defaults; an explicit empty
/// list omits the field from the emitted document.
#[derive(Debug, Clone, Default)]
pub struct ProtectedResourceConfig {
    /// The protected resource URL
    pub resource_url: Option<String>,
    /// Authorization servers protecting the resource
    pub authorization_servers: Vec<String>,
    /// Supported scopes; `None` selects the defaults
    pub scopes_supported: Option<Vec<String>>,
    /// Supported bearer methods; `None` selects the defaults
    pub bearer_methods_supported: Option<Vec<String>>,
}

/// RFC 9728 protected resource metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
}

/// Build RFC 9728 metadata from configuration.
pub fn build_protected_resource_metadata(
    config: &ProtectedResourceConfig,
) -> Result<ProtectedResourceMetadata, DiscoveryError> {
    let resource = config
        .resource_url
        .clone()
        .ok_or(DiscoveryError::MissingResourceUrl)?;
    if config.authorization_servers.is_empty() {
        return Err(DiscoveryError::MissingAuthorizationServers);
    }

    let scopes_supported = match &config.scopes_supported {
        None => Some(vec![
            "tools:read".to_string(),
            "tools:execute".to_string(),
            "logging:write".to_string(),
        ]),
        Some(list) if list.is_empty() => None,
        Some(list) => Some(list.clone()),
    };
    let bearer_methods_supported = match &config.bearer_methods_supported {
        None => Some(vec!["header".to_string()]),
        Some(list) if list.is_empty() => None,
        Some(list) => Some(list.clone()),
    };

    Ok(ProtectedResourceMetadata {
        resource,
        authorization_servers: config.authorization_servers.clone(),
        scopes_supported,
        bearer_methods_supported,
    })
}

/// Parameters for a `WWW-Authenticate` challenge.
#[derive(Debug, Clone, Default)]
pub struct WwwAuthenticateParams {
    pub resource_metadata_url: Option<String>,
    pub realm: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub scope: Option<String>,
}

/// Assemble an RFC 6750 `Bearer` challenge with quoted values.
pub fn build_www_authenticate_header(params: &WwwAuthenticateParams) -> String {
    let mut parts = Vec::new();
    if let Some(realm) = &params.realm {
        parts.push(format!(r#"realm="{realm}""#));
    }
    if let Some(url) = &params.resource_metadata_url {
        parts.push(format!(r#"resource_metadata="{url}""#));
    }
    if let Some(error) = &params.error {
        parts.push(format!(r#"error="{error}""#));
    }
    if let Some(description) = &params.error_description {
        parts.push(format!(r#"error_description="{description}""#));
    }
    if let Some(scope) = &params.scope {
        parts.push(format!(r#"scope="{scope}""#));
    }

    if parts.is_empty() {
        "Bearer".to_string()
    } else {
        format!("Bearer {}", parts.join(", "))
    }
}

/// A 401 with the challenge header and an error body.
pub fn create_401_response(
    resource_metadata_url: Option<&str>,
    error: Option<&str>,
    error_description: Option<&str>,
) -> Response {
    let error = error.unwrap_or("unauthorized");
    let error_description = error_description.unwrap_or("Authorization required");

    let challenge = build_www_authenticate_header(&WwwAuthenticateParams {
        resource_metadata_url: resource_metadata_url.map(str::to_string),
        error: Some(error.to_string()),
        error_description: Some(error_description.to_string()),
        ..Default::default()
    });

    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": error, "error_description": error_description })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// State for the well-known routes.
#[derive(Debug, Clone)]
pub struct DiscoveryState {
    /// Issuer advertised in RFC 8414 metadata
    pub issuer: String,
    /// Protected-resource configuration for RFC 9728 metadata
    pub protected_resource: ProtectedResourceConfig,
}

/// Router serving the two `/.well-known` documents.
pub fn well_known_router(state: DiscoveryState) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(handle_authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(handle_protected_resource_metadata),
        )
        .with_state(Arc::new(state))
}

async fn handle_authorization_server_metadata(
    State(state): State<Arc<DiscoveryState>>,
) -> Response {
    cacheable(Json(build_oauth_server_metadata(&state.issuer)).into_response())
}

async fn handle_protected_resource_metadata(
    State(state): State<Arc<DiscoveryState>>,
) -> Response {
    match build_protected_resource_metadata(&state.protected_resource) {
        Ok(metadata) => cacheable(Json(metadata).into_response()),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}

fn cacheable(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    response
}
