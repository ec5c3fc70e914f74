//! Session Management
//!
//! Server-side session store for the streamable HTTP transport: opaque
//! session identifiers, handshake state, idle expiry and a background sweep.
//! All operations are safe under concurrent access; the map is a `DashMap`
//! keyed by session id.

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
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

// Layer 3: Internal module imports
use crate::lifecycle::{ClientInfo, LifecycleState};

/// Opaque session identifier. Generated ids contain only printable ASCII.
pub type SessionId = String;

/// Handshake state recorded on the session (mirrors the lifecycle machine).
pub type SessionState = LifecycleState;

/// Number of random bytes behind a generated session id (43 chars encoded).
const SESSION_ID_BYTES: usize = 32;

/// Id of the ephemeral pseudo-session used by stateless transports.
pub const STATELESS_SESSION_ID: &str = "stateless";

/// Errors surfaced by the session store.
#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    /// The store is at its configured capacity
    #[error("session limit exceeded: {0}")]
    LimitExceeded(usize),

    /// No session with the given id
    #[error("session not found")]
    NotFound,
}

/// A server-side session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque identifier issued in the `MCP-Session-Id` header
    pub id: SessionId,
    /// Handshake state
    pub state: SessionState,
    /// When the session was created
    pub created_at: Instant,
    /// Last request activity, drives idle expiry
    pub last_active_at: Instant,
    /// Client identity captured by `initialize`
    pub client_info: Option<ClientInfo>,
    /// Client capability map captured by `initialize`
    pub client_capabilities: Option<Value>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: SessionState::Uninitialized,
            created_at: now,
            last_active_at: now,
            client_info: None,
            client_capabilities: None,
        }
    }

    /// The ephemeral pseudo-session every stateless-mode request runs
    /// against. Fixed in `Ready`; never stored.
    pub fn stateless() -> Self {
        let mut session = Self::new(STATELESS_SESSION_ID.to_string());
        session.state = SessionState::Ready;
        session
    }

    /// Whether this is the stateless pseudo-session.
    pub fn is_stateless(&self) -> bool {
        self.id == STATELESS_SESSION_ID
    }
}

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which the sweep destroys a session
    pub idle_ttl: Duration,
    /// Sweep cadence; `Duration::ZERO` disables the background sweep
    pub sweep_interval: Duration,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(1800),      // 30 minutes
            sweep_interval: Duration::from_secs(60),  // 1 minute
            max_sessions: 10_000,
        }
    }
}

/// Session statistics counters.
#[derive(Debug, Default)]
struct SessionStats {
    total_created: AtomicU64,
    expired: AtomicU64,
    destroyed: AtomicU64,
}

/// Snapshot of session statistics.
#[derive(Debug, Clone)]
pub struct SessionStatsSnapshot {
    pub total_created: u64,
    pub currently_active: u64,
    pub expired: u64,
    pub destroyed: u64,
}

/// Callback invoked with the session id whenever a session is destroyed,
/// whether explicitly or by the idle sweep. Used to tear down per-session
/// state held elsewhere (SSE history, handshake state).
pub type DestroyHook = Box<dyn Fn(&str) + Send + Sync>;

/// Concurrent session store with idle expiry.
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, Session>>,
    config: SessionConfig,
    stats: Arc<SessionStats>,
    destroy_hooks: Arc<std::sync::RwLock<Vec<DestroyHook>>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Create a store and start the background sweep unless the interval
    /// is zero.
    pub fn new(config: SessionConfig) -> Self {
        let sessions = Arc::new(DashMap::new());
        let stats = Arc::new(SessionStats::default());

        let mut manager = Self {
            sessions,
            config,
            stats,
            destroy_hooks: Arc::new(std::sync::RwLock::new(Vec::new())),
            sweep_task: None,
        };

        if !manager.config.sweep_interval.is_zero() {
            manager.start_sweep_task();
        }

        manager
    }

    /// Create a store with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    /// Generate an unpredictable session id: 32 random bytes, base64url
    /// without padding. The output alphabet is a strict subset of printable
    /// ASCII (0x21-0x7E).
    pub fn generate_session_id() -> SessionId {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Create a new session in `Uninitialized`.
    pub fn create_session(&self) -> Result<Session, SessionError> {
        if self.sessions.len() >= self.config.max_sessions {
            return Err(SessionError::LimitExceeded(self.config.max_sessions));
        }

        let session = Session::new(Self::generate_session_id());
        self.sessions.insert(session.id.clone(), session.clone());
        self.stats.total_created.fetch_add(1, Ordering::Relaxed);
        debug!(session = %session.id, "session created");
        Ok(session)
    }

    /// Look up a session by id.
    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Refresh a session's activity timestamp.
    pub fn touch_session(&self, id: &str) -> Result<(), SessionError> {
        let mut entry = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        entry.last_active_at = Instant::now();
        Ok(())
    }

    /// Move a session to a new handshake state.
    pub fn update_state(&self, id: &str, state: SessionState) -> Result<(), SessionError> {
        let mut entry = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        entry.state = state;
        Ok(())
    }

    /// Record the client identity and capabilities captured by `initialize`.
    pub fn set_client_info(
        &self,
        id: &str,
        info: ClientInfo,
        capabilities: Value,
    ) -> Result<(), SessionError> {
        let mut entry = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        entry.client_info = Some(info);
        entry.client_capabilities = Some(capabilities);
        Ok(())
    }

    /// Register a callback run whenever a session is destroyed or swept.
    pub fn add_destroy_hook(&self, hook: DestroyHook) {
        let mut hooks = match self.destroy_hooks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.push(hook);
    }

    /// Destroy a session. Returns `true` when a session was removed.
    pub fn destroy_session(&self, id: &str) -> bool {
        if self.sessions.remove(id).is_some() {
            self.stats.destroyed.fetch_add(1, Ordering::Relaxed);
            Self::run_destroy_hooks(&self.destroy_hooks, id);
            debug!(session = %id, "session destroyed");
            true
        } else {
            false
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            total_created: self.stats.total_created.load(Ordering::Relaxed),
            currently_active: self.sessions.len() as u64,
            expired: self.stats.expired.load(Ordering::Relaxed),
            destroyed: self.stats.destroyed.load(Ordering::Relaxed),
        }
    }

    /// Remove sessions idle longer than the TTL. Returns how many were
    /// removed. The background sweep calls this on its interval; tests call
    /// it directly with the sweep disabled.
    pub fn sweep_expired(&self) -> usize {
        Self::sweep(
            &self.sessions,
            &self.stats,
            &self.destroy_hooks,
            self.config.idle_ttl,
        )
    }

    fn run_destroy_hooks(hooks: &std::sync::RwLock<Vec<DestroyHook>>, id: &str) {
        let hooks = match hooks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for hook in hooks.iter() {
            hook(id);
        }
    }

    fn sweep(
        sessions: &DashMap<SessionId, Session>,
        stats: &SessionStats,
        hooks: &std::sync::RwLock<Vec<DestroyHook>>,
        idle_ttl: Duration,
    ) -> usize {
        let now = Instant::now();
        let stale: Vec<SessionId> = sessions
            .iter()
            .filter(|entry| now.duration_since(entry.last_active_at) > idle_ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in stale {
            if sessions.remove(&id).is_some() {
                removed += 1;
                stats.expired.fetch_add(1, Ordering::Relaxed);
                Self::run_destroy_hooks(hooks, &id);
            }
        }
        if removed > 0 {
            debug!(removed, "swept idle sessions");
        }
        removed
    }

    fn start_sweep_task(&mut self) {
        let sessions = Arc::clone(&self.sessions);
        let stats = Arc::clone(&self.stats);
        let hooks = Arc::clone(&self.destroy_hooks);
        let idle_ttl = self.config.idle_ttl;
        let sweep_interval = self.config.sweep_interval;

        self.sweep_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                Self::sweep(&sessions, &stats, &hooks, idle_ttl);
            }
        }));
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = &self.sweep_task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
