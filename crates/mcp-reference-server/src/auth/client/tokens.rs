//! Client-Side Token Manager
//!
//! In-memory token cache keyed by resource, with expiry-buffered refresh
//! and refresh deduplication: concurrent refreshes for the same resource
//! key share one outbound request, and the in-flight handle is cleared on
//! both the success and the failure path.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::oauth::{OAuthClient, OAuthClientError, RefreshOptions, TokenResponse};

/// Cache key for tokens stored without a resource.
const DEFAULT_RESOURCE_KEY: &str = "default";

/// Default token lifetime when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Token manager failures, distinguishable without parsing text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TokenError {
    /// No token is stored for the resource
    #[error("no token stored")]
    NoToken,

    /// The token expired and could not be refreshed
    #[error("token expired and refresh failed")]
    TokenExpired,

    /// The refresh request itself failed
    #[error("refresh failed: {0}")]
    RefreshFailed(String),
}

/// A cached token with its absolute expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    pub token_type: String,
    /// Absolute expiry in Unix milliseconds
    pub expires_at: i64,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    /// Resource the token was stored under
    pub resource: Option<String>,
    /// When the token was stored (Unix milliseconds)
    pub stored_at: i64,
}

/// Token manager configuration.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Tokens are refreshed when within this buffer of expiry
    pub expiry_buffer: Duration,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            expiry_buffer: Duration::from_secs(60),
        }
    }
}

type RefreshOutcome = Result<StoredToken, TokenError>;

/// Per-resource token cache with deduplicated refresh.
pub struct TokenManager {
    client: Arc<OAuthClient>,
    config: TokenManagerConfig,
    tokens: DashMap<String, StoredToken>,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<RefreshOutcome>>>>,
}

impl TokenManager {
    /// Create a manager over an OAuth client.
    pub fn new(client: Arc<OAuthClient>, config: TokenManagerConfig) -> Self {
        Self {
            client,
            config,
            tokens: DashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Store a token response under its resource key.
    pub fn store_token(&self, response: &TokenResponse, resource: Option<&str>) -> StoredToken {
        let now = Utc::now().timestamp_millis();
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let stored = StoredToken {
            access_token: response.access_token.clone(),
            token_type: response.token_type.clone(),
            expires_at: now + (expires_in as i64) * 1000,
            refresh_token: response.refresh_token.clone(),
            scope: response.scope.clone(),
            id_token: response.id_token.clone(),
            resource: resource.map(str::to_string),
            stored_at: now,
        };
        self.tokens.insert(resource_key(resource), stored.clone());
        stored
    }

    /// The stored token for a resource, regardless of freshness.
    pub fn get_stored_token(&self, resource: Option<&str>) -> Option<StoredToken> {
        self.tokens
            .get(&resource_key(resource))
            .map(|e| e.value().clone())
    }

    /// Drop the stored token for a resource.
    pub fn remove_token(&self, resource: Option<&str>) -> bool {
        self.tokens.remove(&resource_key(resource)).is_some()
    }

    /// Number of cached tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// A valid access token for the resource, refreshing when the stored
    /// token is within the expiry buffer. Concurrent callers for the same
    /// resource share one refresh.
    pub async fn get_valid_access_token(
        &self,
        resource: Option<&str>,
    ) -> Result<String, TokenError> {
        let key = resource_key(resource);
        let stored = self.tokens.get(&key).map(|e| e.value().clone());
        let Some(stored) = stored else {
            return Err(TokenError::NoToken);
        };

        let deadline = Utc::now().timestamp_millis()
            + self.config.expiry_buffer.as_millis() as i64;
        if stored.expires_at > deadline {
            return Ok(stored.access_token);
        }

        self.refresh_deduplicated(&key, resource, stored)
            .await
            .map(|token| token.access_token)
    }

    /// Join or start the refresh for a key. The first caller becomes the
    /// leader and runs the request; everyone else awaits the same outcome.
    async fn refresh_deduplicated(
        &self,
        key: &str,
        resource: Option<&str>,
        stored: StoredToken,
    ) -> RefreshOutcome {
        let (sender, mut follower) = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(receiver) = in_flight.get(key) {
                (None, receiver.clone())
            } else {
                let (sender, receiver) = watch::channel(None);
                in_flight.insert(key.to_string(), receiver.clone());
                (Some(sender), receiver)
            }
        };

        match sender {
            Some(sender) => {
                let outcome = self.run_refresh(key, resource, stored).await;
                // Clear the in-flight handle on both paths before waking
                // the followers.
                self.in_flight.lock().await.remove(key);
                let _ = sender.send(Some(outcome.clone()));
                outcome
            }
            None => {
                loop {
                    if let Some(outcome) = follower.borrow().clone() {
                        return outcome;
                    }
                    if follower.changed().await.is_err() {
                        return Err(TokenError::RefreshFailed(
                            "refresh leader went away".to_string(),
                        ));
                    }
                }
            }
        }
    }

    async fn run_refresh(
        &self,
        key: &str,
        resource: Option<&str>,
        stored: StoredToken,
    ) -> RefreshOutcome {
        let Some(refresh_token) = stored.refresh_token.clone() else {
            // Nothing to refresh with; the stale entry is useless.
            self.tokens.remove(key);
            return Err(TokenError::TokenExpired);
        };

        let options = RefreshOptions {
            scopes: None,
            resource: resource.map(str::to_string),
        };

        match self.client.refresh_token(&refresh_token, &options).await {
            Ok(mut response) => {
                // Providers that do not rotate keep the old refresh token.
                if response.refresh_token.is_none() {
                    response.refresh_token = Some(refresh_token);
                }
                debug!(resource = key, "token refreshed");
                Ok(self.store_token(&response, resource))
            }
            Err(OAuthClientError::Provider { error, .. }) if error == "invalid_grant" => {
                // The refresh token was revoked; evict and surface expiry.
                warn!(resource = key, "refresh token revoked");
                self.tokens.remove(key);
                Err(TokenError::TokenExpired)
            }
            Err(other) => Err(TokenError::RefreshFailed(other.to_string())),
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("tokens", &self.tokens.len())
            .finish_non_exhaustive()
    }
}

fn resource_key(resource: Option<&str>) -> String {
    resource.unwrap_or(DEFAULT_RESOURCE_KEY).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::client::oauth::OAuthClientConfig;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_for(mock_uri: &str) -> TokenManager {
        let config = OAuthClientConfig::new(
            Url::parse("https://auth.example/authorize").unwrap(),
            Url::parse(&format!("{mock_uri}/token")).unwrap(),
            "client-1",
            "https://app.example/cb",
        );
        TokenManager::new(
            Arc::new(OAuthClient::new(config).unwrap()),
            TokenManagerConfig::default(),
        )
    }

    fn fresh_response() -> TokenResponse {
        TokenResponse {
            access_token: "at-fresh".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: Some("rt-1".to_string()),
            scope: Some("mcp:read".to_string()),
            id_token: None,
        }
    }

    fn expired_response() -> TokenResponse {
        TokenResponse {
            expires_in: Some(0),
            access_token: "at-stale".to_string(),
            ..fresh_response()
        }
    }

    #[tokio::test]
    async fn no_token_is_reported() {
        let manager = manager_for("http://127.0.0.1:1");
        assert_eq!(
            manager.get_valid_access_token(None).await.unwrap_err(),
            TokenError::NoToken
        );
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let manager = manager_for("http://127.0.0.1:1");
        manager.store_token(&fresh_response(), None);

        let token = manager.get_valid_access_token(None).await.unwrap();
        assert_eq!(token, "at-fresh");
    }

    #[tokio::test]
    async fn expires_at_computed_from_expires_in() {
        let manager = manager_for("http://127.0.0.1:1");
        let before = Utc::now().timestamp_millis();
        let stored = manager.store_token(&fresh_response(), Some("https://r.example"));

        assert!(stored.expires_at >= before + 3_600_000);
        assert_eq!(stored.resource.as_deref(), Some("https://r.example"));
        assert!(manager.get_stored_token(Some("https://r.example")).is_some());
        assert!(manager.get_stored_token(None).is_none());
    }

    #[tokio::test]
    async fn default_lifetime_when_expires_in_absent() {
        let manager = manager_for("http://127.0.0.1:1");
        let response = TokenResponse {
            expires_in: None,
            ..fresh_response()
        };
        let stored = manager.store_token(&response, None);
        assert!(stored.expires_at - stored.stored_at >= 3_599_000);
    }

    #[tokio::test]
    async fn expired_token_triggers_refresh() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-new",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let manager = manager_for(&mock.uri());
        manager.store_token(&expired_response(), None);

        let token = manager.get_valid_access_token(None).await.unwrap();
        assert_eq!(token, "at-new");

        // The old refresh token is kept when the provider does not rotate.
        let stored = manager.get_stored_token(None).unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_request() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(150))
                    .set_body_json(json!({
                        "access_token": "at-shared",
                        "token_type": "Bearer",
                        "expires_in": 3600
                    })),
            )
            .expect(1)
            .mount(&mock)
            .await;

        let manager = Arc::new(manager_for(&mock.uri()));
        manager.store_token(&expired_response(), None);

        let (a, b, c) = tokio::join!(
            manager.get_valid_access_token(None),
            manager.get_valid_access_token(None),
            manager.get_valid_access_token(None),
        );

        assert_eq!(a.unwrap(), "at-shared");
        assert_eq!(b.unwrap(), "at-shared");
        assert_eq!(c.unwrap(), "at-shared");
    }

    #[tokio::test]
    async fn in_flight_handle_cleared_after_failure() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock)
            .await;

        let manager = manager_for(&mock.uri());
        manager.store_token(&expired_response(), None);

        let first = manager.get_valid_access_token(None).await.unwrap_err();
        assert!(matches!(first, TokenError::RefreshFailed(_)));

        // A later call starts a fresh refresh rather than reusing a dead
        // in-flight handle.
        let second = manager.get_valid_access_token(None).await.unwrap_err();
        assert!(matches!(second, TokenError::RefreshFailed(_)));
        assert!(manager.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_grant_evicts_the_token() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "revoked"
            })))
            .mount(&mock)
            .await;

        let manager = manager_for(&mock.uri());
        manager.store_token(&expired_response(), None);

        let error = manager.get_valid_access_token(None).await.unwrap_err();
        assert_eq!(error, TokenError::TokenExpired);
        assert!(manager.get_stored_token(None).is_none());
    }

    #[tokio::test]
    async fn missing_refresh_token_is_expiry() {
        let manager = manager_for("http://127.0.0.1:1");
        let response = TokenResponse {
            refresh_token: None,
            ..expired_response()
        };
        manager.store_token(&response, None);

        let error = manager.get_valid_access_token(None).await.unwrap_err();
        assert_eq!(error, TokenError::TokenExpired);
        assert_eq!(manager.token_count(), 0);
    }
}
