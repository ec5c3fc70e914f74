//! Outbound OAuth Client
//!
//! Builds authorization URLs with PKCE and RFC 8707 resource indicators,
//! validates callbacks (session expiry, constant-time state comparison,
//! provider error passthrough) and talks to the token and introspection
//! endpoints. Structured OAuth error bodies map to typed errors; anything
//! else surfaces the HTTP status.

// Layer 1: Standard library imports
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;
use url::Url;

// Layer 3: Internal module imports
use crate::auth::pkce;

/// Default authorization session lifetime.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

/// OAuth client failures.
#[derive(Debug, Error)]
pub enum OAuthClientError {
    /// The authorization session outlived its TTL before the callback
    #[error("authorization session expired")]
    SessionExpired,

    /// Callback state did not match the session state
    #[error("state mismatch on callback")]
    InvalidState,

    /// The provider returned a structured OAuth error
    #[error("oauth error {error}: {}", description.as_deref().unwrap_or("no description"))]
    Provider {
        /// RFC 6749 error code
        error: String,
        /// Optional human-readable description
        description: Option<String>,
        /// Optional documentation URI
        uri: Option<String>,
    },

    /// Non-OAuth failure from the endpoint
    #[error("token endpoint returned status {status}")]
    Http {
        /// HTTP status code
        status: u16,
    },

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Client misconfiguration
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// OAuth client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    /// Authorization endpoint URL
    pub authorization_endpoint: Url,
    /// Token endpoint URL
    pub token_endpoint: Url,
    /// RFC 7662 introspection endpoint, when available
    pub introspection_endpoint: Option<Url>,
    /// Client identifier
    pub client_id: String,
    /// Client secret for confidential clients
    pub client_secret: Option<String>,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Authorization session lifetime
    pub session_ttl: Duration,
}

impl OAuthClientConfig {
    /// Minimal configuration for a public client.
    pub fn new(
        authorization_endpoint: Url,
        token_endpoint: Url,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authorization_endpoint,
            token_endpoint,
            introspection_endpoint: None,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

/// Options for building an authorization URL.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationUrlOptions {
    /// Requested scopes (joined with spaces)
    pub scopes: Vec<String>,
    /// RFC 8707 resource indicators, one query parameter each
    pub resources: Vec<String>,
    /// Optional audience parameter
    pub audience: Option<String>,
    /// Additional free-form query parameters
    pub extra_params: Vec<(String, String)>,
}

/// State held between building the authorization URL and the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationSession {
    /// CSRF state (256-bit, base64url)
    pub state: String,
    /// PKCE code verifier
    pub code_verifier: String,
    /// Creation instant
    pub created_at: Instant,
    /// Expiry instant
    pub expires_at: Instant,
    /// Resource indicators carried into the exchange
    pub resources: Vec<String>,
}

impl AuthorizationSession {
    /// Whether the session has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
}

impl CallbackParams {
    /// Parse callback parameters from a redirect URI query string.
    pub fn from_query(query: &str) -> Result<Self, OAuthClientError> {
        serde_urlencoded::from_str(query)
            .map_err(|e| OAuthClientError::Configuration(format!("malformed callback query: {e}")))
    }
}

/// Normalized token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Parameters for an authorization-code exchange.
#[derive(Debug, Clone)]
pub struct ExchangeCodeRequest {
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub resource: Option<String>,
}

/// Options for a refresh request.
#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Narrowed scopes to request
    pub scopes: Option<Vec<String>>,
    /// Resource indicator
    pub resource: Option<String>,
}

/// RFC 7662 introspection response.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Wire shape of a structured OAuth error body.
#[derive(Debug, Deserialize)]
struct WireOAuthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_uri: Option<String>,
}

/// The outbound OAuth client.
pub struct OAuthClient {
    config: OAuthClientConfig,
    http: Client,
}

impl OAuthClient {
    /// Create a client.
    pub fn new(config: OAuthClientConfig) -> Result<Self, OAuthClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OAuthClientError::Configuration(e.to_string()))?;
        Ok(Self { config, http })
    }

    /// The client configuration.
    pub fn config(&self) -> &OAuthClientConfig {
        &self.config
    }

    /// Build the authorization URL and its pending session.
    pub fn build_authorization_url(
        &self,
        options: &AuthorizationUrlOptions,
    ) -> Result<(Url, AuthorizationSession), OAuthClientError> {
        let state = generate_state();
        let code_verifier = pkce::generate_default_verifier()
            .map_err(|e| OAuthClientError::Configuration(e.to_string()))?;
        let code_challenge = pkce::generate_challenge(&code_verifier)
            .map_err(|e| OAuthClientError::Configuration(e.to_string()))?;

        let mut url = self.config.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("state", &state)
                .append_pair("code_challenge", &code_challenge)
                .append_pair("code_challenge_method", "S256");
            if !options.scopes.is_empty() {
                query.append_pair("scope", &options.scopes.join(" "));
            }
            for resource in &options.resources {
                query.append_pair("resource", resource);
            }
            if let Some(audience) = &options.audience {
                query.append_pair("audience", audience);
            }
            for (key, value) in &options.extra_params {
                query.append_pair(key, value);
            }
        }

        let now = Instant::now();
        let session = AuthorizationSession {
            state,
            code_verifier,
            created_at: now,
            expires_at: now + self.config.session_ttl,
            resources: options.resources.clone(),
        };
        Ok((url, session))
    }

    /// Validate a callback and exchange its code for tokens.
    ///
    /// Validation order: session expiry, then constant-time state
    /// comparison, then provider error passthrough, then the exchange.
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
        session: &AuthorizationSession,
    ) -> Result<TokenResponse, OAuthClientError> {
        if session.is_expired() {
            return Err(OAuthClientError::SessionExpired);
        }

        let callback_state = params.state.as_deref().unwrap_or("");
        let state_matches: bool = callback_state
            .as_bytes()
            .ct_eq(session.state.as_bytes())
            .into();
        if !state_matches {
            return Err(OAuthClientError::InvalidState);
        }

        if let Some(error) = &params.error {
            return Err(OAuthClientError::Provider {
                error: error.clone(),
                description: params.error_description.clone(),
                uri: params.error_uri.clone(),
            });
        }

        let code = params.code.clone().ok_or_else(|| OAuthClientError::Provider {
            error: "invalid_request".to_string(),
            description: Some("callback carried no code".to_string()),
            uri: None,
        })?;

        self.exchange_code(&ExchangeCodeRequest {
            code,
            code_verifier: session.code_verifier.clone(),
            redirect_uri: self.config.redirect_uri.clone(),
            resource: session.resources.first().cloned(),
        })
        .await
    }

    /// Exchange an authorization code at the token endpoint.
    pub async fn exchange_code(
        &self,
        request: &ExchangeCodeRequest,
    ) -> Result<TokenResponse, OAuthClientError> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", request.code.clone()),
            ("code_verifier", request.code_verifier.clone()),
            ("redirect_uri", request.redirect_uri.clone()),
            ("client_id", self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if let Some(resource) = &request.resource {
            form.push(("resource", resource.clone()));
        }

        debug!("exchanging authorization code");
        self.post_token_form(&form).await
    }

    /// Refresh an access token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        options: &RefreshOptions,
    ) -> Result<TokenResponse, OAuthClientError> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if let Some(scopes) = &options.scopes {
            form.push(("scope", scopes.join(" ")));
        }
        if let Some(resource) = &options.resource {
            form.push(("resource", resource.clone()));
        }

        debug!("refreshing access token");
        self.post_token_form(&form).await
    }

    /// RFC 7662 token introspection, when an endpoint is configured.
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<IntrospectionResponse, OAuthClientError> {
        let endpoint = self.config.introspection_endpoint.clone().ok_or_else(|| {
            OAuthClientError::Configuration("no introspection endpoint configured".to_string())
        })?;

        let mut form: Vec<(&str, String)> = vec![("token", token.to_string())];
        if let Some(hint) = token_type_hint {
            form.push(("token_type_hint", hint.to_string()));
        }

        let mut request = self.http.post(endpoint).form(&form);
        if let Some(secret) = &self.config.client_secret {
            request = request.basic_auth(&self.config.client_id, Some(secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| OAuthClientError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| OAuthClientError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(parse_error_body(status.as_u16(), &body));
        }
        serde_json::from_slice(&body).map_err(|e| OAuthClientError::Network(e.to_string()))
    }

    async fn post_token_form(
        &self,
        form: &[(&str, String)],
    ) -> Result<TokenResponse, OAuthClientError> {
        let response = self
            .http
            .post(self.config.token_endpoint.clone())
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthClientError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| OAuthClientError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(parse_error_body(status.as_u16(), &body));
        }
        serde_json::from_slice(&body).map_err(|e| OAuthClientError::Network(e.to_string()))
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.config.client_id)
            .field("token_endpoint", &self.config.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// Fresh 256-bit state, base64url without padding.
fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A well-formed OAuth error body maps to a provider error; anything else
/// keeps the status only.
fn parse_error_body(status: u16, body: &[u8]) -> OAuthClientError {
    match serde_json::from_slice::<WireOAuthError>(body) {
        Ok(wire) => OAuthClientError::Provider {
            error: wire.error,
            description: wire.error_description,
            uri: wire.error_uri,
        },
        Err(_) => OAuthClientError::Http { status },
    }
}
