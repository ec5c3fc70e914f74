//! In-Memory OAuth Store
//!
//! Two tables: single-use authorization codes and multi-read refresh
//! tokens, both TTL-bound with a periodic sweep. Code consumption is atomic
//! (the map removal either wins or loses to the sweep, never both) and a
//! consumed or expired code is gone for good.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Random bytes behind generated codes and tokens (43 chars encoded).
const TOKEN_BYTES: usize = 32;

/// Payload of an authorization code.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationCode {
    /// Requesting client
    pub client_id: String,
    /// Redirect URI the code was bound to
    pub redirect_uri: String,
    /// Declared PKCE challenge
    pub code_challenge: String,
    /// Challenge method; always `S256`
    pub code_challenge_method: String,
    /// Authenticated subject
    pub subject: String,
    /// Granted scope (space-delimited)
    pub scope: String,
    /// Client state, echoed on the redirect
    pub state: Option<String>,
}

/// Payload of a refresh token.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenEntry {
    /// Client the token was issued to
    pub client_id: String,
    /// Subject the token refreshes for
    pub subject: String,
    /// Granted scope (space-delimited)
    pub scope: String,
}

#[derive(Debug)]
struct StoredCode {
    payload: AuthorizationCode,
    created_at: Instant,
    ttl: Duration,
}

#[derive(Debug)]
struct StoredRefresh {
    payload: RefreshTokenEntry,
    created_at: Instant,
    ttl: Duration,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct OAuthStoreConfig {
    /// Authorization code lifetime
    pub code_ttl: Duration,
    /// Sweep cadence; `Duration::ZERO` disables the sweep
    pub sweep_interval: Duration,
}

impl Default for OAuthStoreConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct StoreStats {
    codes_issued: AtomicU64,
    codes_consumed: AtomicU64,
    codes_expired: AtomicU64,
    refresh_issued: AtomicU64,
    refresh_revoked: AtomicU64,
    refresh_expired: AtomicU64,
}

/// Snapshot of store statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthStoreStats {
    pub codes_issued: u64,
    pub codes_consumed: u64,
    pub codes_expired: u64,
    pub codes_pending: u64,
    pub refresh_issued: u64,
    pub refresh_revoked: u64,
    pub refresh_expired: u64,
    pub refresh_active: u64,
}

/// In-memory authorization-code and refresh-token store.
pub struct OAuthStore {
    codes: Arc<DashMap<String, StoredCode>>,
    refresh_tokens: Arc<DashMap<String, StoredRefresh>>,
    config: OAuthStoreConfig,
    stats: Arc<StoreStats>,
    sweep_task: Option<JoinHandle<()>>,
}

impl OAuthStore {
    /// Create a store and start the sweep unless the interval is zero.
    pub fn new(config: OAuthStoreConfig) -> Self {
        let codes = Arc::new(DashMap::new());
        let refresh_tokens = Arc::new(DashMap::new());
        let stats = Arc::new(StoreStats::default());

        let mut store = Self {
            codes,
            refresh_tokens,
            config,
            stats,
            sweep_task: None,
        };

        if !store.config.sweep_interval.is_zero() {
            store.start_sweep_task();
        }

        store
    }

    /// Create a store with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(OAuthStoreConfig::default())
    }

    /// Generate opaque token material: 32 random bytes, base64url unpadded.
    pub fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Store an authorization code, returning the generated code value.
    pub fn store_code(&self, payload: AuthorizationCode) -> String {
        let code = Self::generate_token();
        self.codes.insert(
            code.clone(),
            StoredCode {
                payload,
                created_at: Instant::now(),
                ttl: self.config.code_ttl,
            },
        );
        self.stats.codes_issued.fetch_add(1, Ordering::Relaxed);
        code
    }

    /// Atomically consume a code. Returns the payload exactly once; any
    /// later call (or a call after TTL expiry) returns `None`.
    pub fn consume_code(&self, code: &str) -> Option<AuthorizationCode> {
        let (_, stored) = self.codes.remove(code)?;
        if stored.created_at.elapsed() > stored.ttl {
            self.stats.codes_expired.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.stats.codes_consumed.fetch_add(1, Ordering::Relaxed);
        Some(stored.payload)
    }

    /// Store a refresh token with the given lifetime, returning the token.
    pub fn store_refresh(&self, payload: RefreshTokenEntry, ttl: Duration) -> String {
        let token = Self::generate_token();
        self.refresh_tokens.insert(
            token.clone(),
            StoredRefresh {
                payload,
                created_at: Instant::now(),
                ttl,
            },
        );
        self.stats.refresh_issued.fetch_add(1, Ordering::Relaxed);
        token
    }

    /// Look up a refresh token. Multi-read; expired tokens are never
    /// returned (and are removed on sight).
    pub fn get_refresh(&self, token: &str) -> Option<RefreshTokenEntry> {
        let expired = {
            let entry = self.refresh_tokens.get(token)?;
            entry.created_at.elapsed() > entry.ttl
        };
        if expired {
            if self.refresh_tokens.remove(token).is_some() {
                self.stats.refresh_expired.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }
        self.refresh_tokens
            .get(token)
            .map(|entry| entry.payload.clone())
    }

    /// Revoke a refresh token. Returns `true` when a live token was removed.
    pub fn revoke_refresh(&self, token: &str) -> bool {
        if self.refresh_tokens.remove(token).is_some() {
            self.stats.refresh_revoked.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> OAuthStoreStats {
        OAuthStoreStats {
            codes_issued: self.stats.codes_issued.load(Ordering::Relaxed),
            codes_consumed: self.stats.codes_consumed.load(Ordering::Relaxed),
            codes_expired: self.stats.codes_expired.load(Ordering::Relaxed),
            codes_pending: self.codes.len() as u64,
            refresh_issued: self.stats.refresh_issued.load(Ordering::Relaxed),
            refresh_revoked: self.stats.refresh_revoked.load(Ordering::Relaxed),
            refresh_expired: self.stats.refresh_expired.load(Ordering::Relaxed),
            refresh_active: self.refresh_tokens.len() as u64,
        }
    }

    /// Drop every code and refresh token.
    pub fn clear(&self) {
        self.codes.clear();
        self.refresh_tokens.clear();
    }

    /// Remove expired entries from both tables. The sweep task calls this
    /// on its interval; tests call it directly.
    pub fn sweep_expired(&self) -> usize {
        Self::sweep(&self.codes, &self.refresh_tokens, &self.stats)
    }

    fn sweep(
        codes: &DashMap<String, StoredCode>,
        refresh_tokens: &DashMap<String, StoredRefresh>,
        stats: &StoreStats,
    ) -> usize {
        let mut removed = 0;

        let stale_codes: Vec<String> = codes
            .iter()
            .filter(|e| e.created_at.elapsed() > e.ttl)
            .map(|e| e.key().clone())
            .collect();
        for code in stale_codes {
            if codes.remove(&code).is_some() {
                stats.codes_expired.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }

        let stale_refresh: Vec<String> = refresh_tokens
            .iter()
            .filter(|e| e.created_at.elapsed() > e.ttl)
            .map(|e| e.key().clone())
            .collect();
        for token in stale_refresh {
            if refresh_tokens.remove(&token).is_some() {
                stats.refresh_expired.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "swept expired oauth entries");
        }
        removed
    }

    fn start_sweep_task(&mut self) {
        let codes = Arc::clone(&self.codes);
        let refresh_tokens = Arc::clone(&self.refresh_tokens);
        let stats = Arc::clone(&self.stats);
        let interval = self.config.sweep_interval;

        self.sweep_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                Self::sweep(&codes, &refresh_tokens, &stats);
            }
        }));
    }
}

impl Drop for OAuthStore {
    fn drop(&mut self) {
        if let Some(task) = &self.sweep_task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for OAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStore")
            .field("codes", &self.codes.len())
            .field("refresh_tokens", &self.refresh_tokens.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_without_sweep() -> OAuthStore {
        OAuthStore::new(OAuthStoreConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        })
    }

    fn code_payload() -> AuthorizationCode {
        AuthorizationCode {
            client_id: "client-1".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            code_challenge: "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string(),
            code_challenge_method: "S256".to_string(),
            subject: "user-7".to_string(),
            scope: "mcp:read mcp:write".to_string(),
            state: Some("xyz".to_string()),
        }
    }

    #[test]
    fn generated_tokens_are_long_and_unique() {
        let a = OAuthStore::generate_token();
        let b = OAuthStore::generate_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn code_is_single_use() {
        let store = store_without_sweep();
        let code = store.store_code(code_payload());

        let first = store.consume_code(&code);
        assert_eq!(first, Some(code_payload()));

        // Every later consumption fails, even within TTL.
        assert_eq!(store.consume_code(&code), None);
        assert_eq!(store.consume_code(&code), None);

        let stats = store.stats();
        assert_eq!(stats.codes_issued, 1);
        assert_eq!(stats.codes_consumed, 1);
    }

    #[tokio::test]
    async fn expired_code_is_not_consumable() {
        let store = OAuthStore::new(OAuthStoreConfig {
            code_ttl: Duration::from_millis(20),
            sweep_interval: Duration::ZERO,
        });
        let code = store.store_code(code_payload());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.consume_code(&code), None);
        assert_eq!(store.stats().codes_expired, 1);
    }

    #[tokio::test]
    async fn refresh_token_is_multi_read() {
        let store = store_without_sweep();
        let payload = RefreshTokenEntry {
            client_id: "client-1".to_string(),
            subject: "user-7".to_string(),
            scope: "mcp:read".to_string(),
        };
        let token = store.store_refresh(payload.clone(), Duration::from_secs(60));

        assert_eq!(store.get_refresh(&token), Some(payload.clone()));
        assert_eq!(store.get_refresh(&token), Some(payload));
    }

    #[tokio::test]
    async fn refresh_token_revocation() {
        let store = store_without_sweep();
        let token = store.store_refresh(
            RefreshTokenEntry {
                client_id: "c".to_string(),
                subject: "s".to_string(),
                scope: String::new(),
            },
            Duration::from_secs(60),
        );

        assert!(store.revoke_refresh(&token));
        assert!(!store.revoke_refresh(&token));
        assert_eq!(store.get_refresh(&token), None);
    }

    #[tokio::test]
    async fn expired_refresh_token_never_returned() {
        let store = store_without_sweep();
        let token = store.store_refresh(
            RefreshTokenEntry {
                client_id: "c".to_string(),
                subject: "s".to_string(),
                scope: String::new(),
            },
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get_refresh(&token), None);
        assert_eq!(store.stats().refresh_expired, 1);
    }

    #[tokio::test]
    async fn sweep_prunes_both_tables() {
        let store = OAuthStore::new(OAuthStoreConfig {
            code_ttl: Duration::from_millis(10),
            sweep_interval: Duration::ZERO,
        });
        store.store_code(code_payload());
        store.store_refresh(
            RefreshTokenEntry {
                client_id: "c".to_string(),
                subject: "s".to_string(),
                scope: String::new(),
            },
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.stats().codes_pending, 0);
        assert_eq!(store.stats().refresh_active, 0);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let store = store_without_sweep();
        store.store_code(code_payload());
        store.store_refresh(
            RefreshTokenEntry {
                client_id: "c".to_string(),
                subject: "s".to_string(),
                scope: String::new(),
            },
            Duration::from_secs(60),
        );

        store.clear();
        let stats = store.stats();
        assert_eq!(stats.codes_pending, 0);
        assert_eq!(stats.refresh_active, 0);
    }
}
