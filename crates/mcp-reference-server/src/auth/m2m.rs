//! Machine-to-Machine (Client Credentials) Client
//!
//! Acquires access tokens with the `client_credentials` grant, caching the
//! result until expiry (minus a buffer) and deduplicating concurrent
//! default-option requests. Per-call scope or audience overrides bypass the
//! cache entirely and are never cached.
//!
//! For `client_secret_basic` the credentials are percent-encoded before the
//! base64 step, per RFC 6749 §2.3.1.

// Layer 1: Standard library imports
use std::collections::HashMap as StdHashMap;
use std::time::Duration;

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::debug;
use url::Url;

/// Client authentication methods for the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// `Authorization: Basic` header (default)
    ClientSecretBasic,
    /// Credentials in the form body
    ClientSecretPost,
}

/// M2M failures. Structured OAuth errors keep their code; everything else
/// is `server_error` with the status in the description.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{error_code}: {description}")]
pub struct M2MAuthError {
    /// OAuth error code (or `server_error`)
    pub error_code: String,
    /// Human-readable description
    pub description: String,
    /// Optional documentation URI
    pub error_uri: Option<String>,
}

impl M2MAuthError {
    fn server_error(description: impl Into<String>) -> Self {
        Self {
            error_code: "server_error".to_string(),
            description: description.into(),
            error_uri: None,
        }
    }
}

/// M2M client configuration.
#[derive(Debug, Clone)]
pub struct M2MConfig {
    /// Token endpoint URL
    pub token_endpoint: Url,
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// How the client authenticates at the token endpoint
    pub auth_method: ClientAuthMethod,
    /// Default scopes to request
    pub scopes: Vec<String>,
    /// Default audience to request
    pub audience: Option<String>,
    /// Cached tokens are refreshed within this buffer of expiry
    pub expiry_buffer: Duration,
}

impl M2MConfig {
    /// Configuration with the RFC defaults: basic auth, 60 s buffer.
    pub fn new(
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_endpoint,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_method: ClientAuthMethod::ClientSecretBasic,
            scopes: Vec::new(),
            audience: None,
            expiry_buffer: Duration::from_secs(60),
        }
    }
}

/// The configuration as exposed by [`M2MClient::get_config`]: everything
/// except the secret.
#[derive(Debug, Clone, PartialEq)]
pub struct M2MConfigPublic {
    pub token_endpoint: Url,
    pub client_id: String,
    pub auth_method: ClientAuthMethod,
    pub scopes: Vec<String>,
    pub audience: Option<String>,
    pub expiry_buffer: Duration,
}

/// Per-call overrides. Any override bypasses the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct M2MTokenOptions {
    pub scopes: Option<Vec<String>>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    /// Absolute expiry in Unix milliseconds
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct WireTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_uri: Option<String>,
}

type TokenOutcome = Result<String, M2MAuthError>;

/// Client-credentials token client with caching and deduplication.
pub struct M2MClient {
    config: M2MConfig,
    http: Client,
    cache: Mutex<Option<CachedToken>>,
    in_flight: Mutex<Option<watch::Receiver<Option<TokenOutcome>>>>,
}

impl M2MClient {
    /// Create a client.
    pub fn new(config: M2MConfig) -> Result<Self, M2MAuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| M2MAuthError::server_error(e.to_string()))?;
        Ok(Self {
            config,
            http,
            cache: Mutex::new(None),
            in_flight: Mutex::new(None),
        })
    }

    /// An access token for the configured defaults, or for the overrides.
    ///
    /// Default-option calls serve from cache while valid and share a single
    /// in-flight request otherwise. Override calls always hit the endpoint
    /// and the result is not cached.
    pub async fn get_access_token(
        &self,
        options: Option<&M2MTokenOptions>,
    ) -> Result<String, M2MAuthError> {
        if let Some(options) = options {
            if options.scopes.is_some() || options.audience.is_some() {
                let response = self.request_token(options).await?;
                return Ok(response.access_token);
            }
        }

        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        self.fetch_deduplicated().await
    }

    /// Whether the cached token is still valid (buffer included).
    pub async fn is_token_valid(&self) -> bool {
        self.cached_token().await.is_some()
    }

    /// Absolute expiry of the cached token, in Unix milliseconds.
    pub async fn get_token_expiration(&self) -> Option<i64> {
        self.cache.lock().await.as_ref().map(|t| t.expires_at)
    }

    /// Drop the cached token.
    pub async fn clear_cache(&self) {
        *self.cache.lock().await = None;
    }

    /// The configuration minus the secret.
    pub fn get_config(&self) -> M2MConfigPublic {
        M2MConfigPublic {
            token_endpoint: self.config.token_endpoint.clone(),
            client_id: self.config.client_id.clone(),
            auth_method: self.config.auth_method,
            scopes: self.config.scopes.clone(),
            audience: self.config.audience.clone(),
            expiry_buffer: self.config.expiry_buffer,
        }
    }

    async fn cached_token(&self) -> Option<String> {
        let cache = self.cache.lock().await;
        let token = cache.as_ref()?;
        let deadline =
            Utc::now().timestamp_millis() + self.config.expiry_buffer.as_millis() as i64;
        (token.expires_at > deadline).then(|| token.access_token.clone())
    }

    /// One outbound request no matter how many default-option callers
    /// arrive while it is in flight.
    async fn fetch_deduplicated(&self) -> TokenOutcome {
        let (sender, mut follower) = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(receiver) = in_flight.as_ref() {
                (None, receiver.clone())
            } else {
                let (sender, receiver) = watch::channel(None);
                *in_flight = Some(receiver.clone());
                (Some(sender), receiver)
            }
        };

        match sender {
            Some(sender) => {
                let outcome = self.fetch_and_cache().await;
                *self.in_flight.lock().await = None;
                let _ = sender.send(Some(outcome.clone()));
                outcome
            }
            None => loop {
                if let Some(outcome) = follower.borrow().clone() {
                    return outcome;
                }
                if follower.changed().await.is_err() {
                    return Err(M2MAuthError::server_error("token request leader went away"));
                }
            },
        }
    }

    async fn fetch_and_cache(&self) -> TokenOutcome {
        let response = self.request_token(&M2MTokenOptions::default()).await?;
        let expires_in = response.expires_in.unwrap_or(3600);
        let expires_at = Utc::now().timestamp_millis() + (expires_in as i64) * 1000;

        *self.cache.lock().await = Some(CachedToken {
            access_token: response.access_token.clone(),
            expires_at,
        });
        debug!("m2m token cached");
        Ok(response.access_token)
    }

    async fn request_token(
        &self,
        options: &M2MTokenOptions,
    ) -> Result<WireTokenResponse, M2MAuthError> {
        let mut form: StdHashMap<&str, String> = StdHashMap::new();
        form.insert("grant_type", "client_credentials".to_string());

        let scopes = options.scopes.as_ref().unwrap_or(&self.config.scopes);
        if !scopes.is_empty() {
            form.insert("scope", scopes.join(" "));
        }
        if let Some(audience) = options.audience.as_ref().or(self.config.audience.as_ref()) {
            form.insert("audience", audience.clone());
        }

        let mut request = self.http.post(self.config.token_endpoint.clone());
        match self.config.auth_method {
            ClientAuthMethod::ClientSecretBasic => {
                request = request.header(
                    reqwest::header::AUTHORIZATION,
                    basic_credentials(&self.config.client_id, &self.config.client_secret),
                );
            }
            ClientAuthMethod::ClientSecretPost => {
                form.insert("client_id", self.config.client_id.clone());
                form.insert("client_secret", self.config.client_secret.clone());
            }
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| M2MAuthError::server_error(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| M2MAuthError::server_error(e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_slice::<WireErrorResponse>(&body) {
                Ok(wire) => M2MAuthError {
                    error_code: wire.error,
                    description: wire
                        .error_description
                        .unwrap_or_else(|| "token endpoint refused the request".to_string()),
                    error_uri: wire.error_uri,
                },
                Err(_) => M2MAuthError::server_error(format!(
                    "token endpoint returned status {status}"
                )),
            });
        }

        serde_json::from_slice(&body).map_err(|e| M2MAuthError::server_error(e.to_string()))
    }
}

impl std::fmt::Debug for M2MClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret stays out of debug output.
        f.debug_struct("M2MClient")
            .field("client_id", &self.config.client_id)
            .field("token_endpoint", &self.config.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// RFC 6749 §2.3.1: percent-encode the id and secret, then base64 the pair.
fn basic_credentials(client_id: &str, client_secret: &str) -> String {
    let encoded_id = urlencoding::encode(client_id);
    let encoded_secret = urlencoding::encode(client_secret);
    let credentials = STANDARD.encode(format!("{encoded_id}:{encoded_secret}"));
    format!("Basic {credentials}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(mock_uri: &str) -> M2MConfig {
        M2MConfig::new(
            Url::parse(&format!("{mock_uri}/token")).unwrap(),
            "svc-client",
            "svc-secret",
        )
    }

    fn token_body(token: &str) -> serde_json::Value {
        json!({ "access_token": token, "token_type": "Bearer", "expires_in": 3600 })
    }

    #[test]
    fn basic_credentials_percent_encode_before_base64() {
        let header = basic_credentials("client with space", "secret:with/chars");
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, "client%20with%20space:secret%3Awith%2Fchars");
    }

    #[test]
    fn config_view_excludes_secret() {
        let client = M2MClient::new(config("http://127.0.0.1:1")).unwrap();
        let public = client.get_config();
        assert_eq!(public.client_id, "svc-client");
        assert_eq!(public.auth_method, ClientAuthMethod::ClientSecretBasic);
        // Debug output never leaks the secret either.
        assert!(!format!("{client:?}").contains("svc-secret"));
    }

    #[tokio::test]
    async fn token_is_fetched_with_basic_auth_and_cached() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header_exists("Authorization"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("m2m-1")))
            .expect(1)
            .mount(&mock)
            .await;

        let client = M2MClient::new(config(&mock.uri())).unwrap();
        assert!(!client.is_token_valid().await);

        let first = client.get_access_token(None).await.unwrap();
        let second = client.get_access_token(None).await.unwrap();
        assert_eq!(first, "m2m-1");
        assert_eq!(second, "m2m-1");
        assert!(client.is_token_valid().await);
        assert!(client.get_token_expiration().await.unwrap() > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn secret_post_puts_credentials_in_body() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("client_id=svc-client"))
            .and(body_string_contains("client_secret=svc-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("m2m-post")))
            .expect(1)
            .mount(&mock)
            .await;

        let mut config = config(&mock.uri());
        config.auth_method = ClientAuthMethod::ClientSecretPost;
        let client = M2MClient::new(config).unwrap();

        assert_eq!(client.get_access_token(None).await.unwrap(), "m2m-post");
    }

    #[tokio::test]
    async fn concurrent_default_calls_share_one_request() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(150))
                    .set_body_json(token_body("m2m-shared")),
            )
            .expect(1)
            .mount(&mock)
            .await;

        let client = Arc::new(M2MClient::new(config(&mock.uri())).unwrap());
        let (a, b, c) = tokio::join!(
            client.get_access_token(None),
            client.get_access_token(None),
            client.get_access_token(None),
        );

        assert_eq!(a.unwrap(), "m2m-shared");
        assert_eq!(b.unwrap(), "m2m-shared");
        assert_eq!(c.unwrap(), "m2m-shared");
    }

    #[tokio::test]
    async fn override_bypasses_and_does_not_populate_cache() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("scope=special"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("m2m-special")))
            .expect(2)
            .mount(&mock)
            .await;

        let client = M2MClient::new(config(&mock.uri())).unwrap();
        let options = M2MTokenOptions {
            scopes: Some(vec!["special".to_string()]),
            audience: None,
        };

        // Two override calls: two requests, nothing cached.
        assert_eq!(
            client.get_access_token(Some(&options)).await.unwrap(),
            "m2m-special"
        );
        assert_eq!(
            client.get_access_token(Some(&options)).await.unwrap(),
            "m2m-special"
        );
        assert!(!client.is_token_valid().await);
    }

    #[tokio::test]
    async fn oauth_error_body_keeps_its_code() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "bad credentials"
            })))
            .mount(&mock)
            .await;

        let client = M2MClient::new(config(&mock.uri())).unwrap();
        let error = client.get_access_token(None).await.unwrap_err();
        assert_eq!(error.error_code, "invalid_client");
        assert_eq!(error.description, "bad credentials");
    }

    #[tokio::test]
    async fn non_oauth_error_is_server_error_with_status() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&mock)
            .await;

        let client = M2MClient::new(config(&mock.uri())).unwrap();
        let error = client.get_access_token(None).await.unwrap_err();
        assert_eq!(error.error_code, "server_error");
        assert!(error.description.contains("503"));
    }

    #[tokio::test]
    async fn clear_cache_forces_a_new_request() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("m2m-x")))
            .expect(2)
            .mount(&mock)
            .await;

        let client = M2MClient::new(config(&mock.uri())).unwrap();
        client.get_access_token(None).await.unwrap();
        client.clear_cache().await;
        assert!(!client.is_token_valid().await);
        client.get_access_token(None).await.unwrap();
    }
}
