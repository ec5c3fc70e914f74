//! SSE Stream and Manager
//!
//! Per-session server-sent-event streams with monotonically increasing event
//! ids, a bounded replay ring and `Last-Event-Id` resumption. Event ids are
//! `<session>:<sequence>`; the sequence and the ring outlive any individual
//! stream so a reconnect continues strictly after the last delivered event.
//!
//! Each stream owns the write half of an mpsc channel whose receiver feeds
//! the HTTP response body, so writes to one response are naturally
//! serialized. A keep-alive task writes an SSE comment on a configurable
//! interval and is aborted when the stream closes.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::protocol::{serialize, JsonRpcMessage};
use crate::session::SessionId;

/// Frame channel depth per stream; writers await when the client is slow.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Errors surfaced by the SSE layer.
#[derive(Debug, Error)]
pub enum SseError {
    /// The client disconnected or the stream was closed
    #[error("stream closed")]
    StreamClosed,

    /// The message could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Configuration for streams created by the manager.
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Replay ring capacity per session
    pub buffer_size: usize,
    /// Keep-alive comment cadence; `None` disables the timer
    pub keep_alive_interval: Option<Duration>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            keep_alive_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// A buffered event retained for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEvent {
    /// Per-session sequence number (starts at 1)
    pub sequence: u64,
    /// Wire id: `<session>:<sequence>`
    pub id: String,
    /// Optional `event:` type line
    pub event_type: Option<String>,
    /// Serialized JSON-RPC payload
    pub data: String,
}

impl BufferedEvent {
    /// Render the event in SSE wire format.
    fn to_wire(&self) -> String {
        match &self.event_type {
            Some(event_type) => {
                format!("id: {}\nevent: {}\ndata: {}\n\n", self.id, event_type, self.data)
            }
            None => format!("id: {}\ndata: {}\n\n", self.id, self.data),
        }
    }
}

/// Per-session event history: the sequence counter and the replay ring.
/// Owned by the manager so it survives stream replacement.
#[derive(Debug)]
struct EventHistory {
    sequence: u64,
    ring: VecDeque<BufferedEvent>,
    capacity: usize,
}

impl EventHistory {
    fn new(capacity: usize) -> Self {
        Self {
            sequence: 0,
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, event: BufferedEvent) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(event);
    }

    /// Buffered events with sequence strictly greater than `after`.
    fn events_after(&self, after: u64) -> Vec<BufferedEvent> {
        self.ring
            .iter()
            .filter(|event| event.sequence > after)
            .cloned()
            .collect()
    }
}

/// A single long-lived SSE response.
pub struct SseStream {
    session_id: SessionId,
    history: Arc<Mutex<EventHistory>>,
    sender: mpsc::Sender<String>,
    active: AtomicBool,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
}

impl SseStream {
    /// Create a stream over the given shared history, returning the stream
    /// handle and the HTTP response whose body it writes into. The response
    /// carries the SSE headers and a no-buffering hint.
    fn new(
        session_id: SessionId,
        history: Arc<Mutex<EventHistory>>,
        keep_alive_interval: Option<Duration>,
    ) -> (Arc<Self>, Response) {
        let (sender, receiver) = mpsc::channel::<String>(STREAM_CHANNEL_CAPACITY);

        let body = Body::from_stream(
            ReceiverStream::new(receiver).map(Ok::<_, Infallible>),
        );
        // Infallible response construction: static header values only.
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(body)
            .unwrap_or_else(|_| Response::new(Body::empty()));

        let stream = Arc::new(Self {
            session_id,
            history,
            sender,
            active: AtomicBool::new(true),
            keep_alive_task: Mutex::new(None),
        });

        if let Some(interval) = keep_alive_interval {
            stream.start_keep_alive(interval);
        }

        (stream, response)
    }

    /// Session this stream belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the stream is still writable.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current sequence counter (last assigned sequence).
    pub fn sequence(&self) -> u64 {
        self.lock_history().sequence
    }

    /// Serialize and send a JSON-RPC message, assigning the next sequence.
    /// Returns the assigned sequence.
    pub async fn send(&self, message: &JsonRpcMessage) -> Result<u64, SseError> {
        self.send_internal(message, None).await
    }

    /// Like [`send`](Self::send) but with an `event:` type line.
    pub async fn send_with_type(
        &self,
        message: &JsonRpcMessage,
        event_type: &str,
    ) -> Result<u64, SseError> {
        self.send_internal(message, Some(event_type.to_string())).await
    }

    async fn send_internal(
        &self,
        message: &JsonRpcMessage,
        event_type: Option<String>,
    ) -> Result<u64, SseError> {
        if !self.is_active() {
            return Err(SseError::StreamClosed);
        }

        let data = serialize(message)
            .map_err(|e| SseError::Serialization(e.to_string()))
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| SseError::Serialization(e.to_string()))
            })?;

        let event = {
            let mut history = self.lock_history();
            history.sequence += 1;
            let event = BufferedEvent {
                sequence: history.sequence,
                id: format!("{}:{}", self.session_id, history.sequence),
                event_type,
                data,
            };
            history.push(event.clone());
            event
        };

        self.write_frame(event.to_wire()).await?;
        Ok(event.sequence)
    }

    /// Re-emit a buffered event using its original id, advancing the
    /// sequence counter to at least that event's sequence so subsequent
    /// sends continue strictly after it.
    pub async fn replay_event(&self, event: &BufferedEvent) -> Result<(), SseError> {
        {
            let mut history = self.lock_history();
            if event.sequence > history.sequence {
                history.sequence = event.sequence;
            }
        }
        self.write_frame(event.to_wire()).await
    }

    /// Close the stream: stop the keep-alive timer and mark it inactive.
    /// The response body ends once buffered frames drain.
    pub fn close(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(session = %self.session_id, "sse stream closed");
        }
        if let Ok(mut guard) = self.keep_alive_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }

    async fn write_frame(&self, frame: String) -> Result<(), SseError> {
        if self.sender.send(frame).await.is_err() {
            // Receiver dropped: the client disconnected.
            self.close();
            return Err(SseError::StreamClosed);
        }
        Ok(())
    }

    fn start_keep_alive(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick is immediate
            loop {
                ticker.tick().await;
                let Some(stream) = weak.upgrade() else { break };
                if !stream.is_active() {
                    break;
                }
                if stream.sender.send(": keep-alive\n\n".to_string()).await.is_err() {
                    stream.close();
                    break;
                }
            }
        });
        if let Ok(mut guard) = self.keep_alive_task.lock() {
            *guard = Some(task);
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, EventHistory> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.keep_alive_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for SseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseStream")
            .field("session_id", &self.session_id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Maps each session to its current stream and owns the per-session event
/// history so replay survives stream replacement.
pub struct SseManager {
    streams: DashMap<SessionId, Arc<SseStream>>,
    histories: DashMap<SessionId, Arc<Mutex<EventHistory>>>,
    config: SseConfig,
}

impl SseManager {
    /// Create a manager with the given stream configuration.
    pub fn new(config: SseConfig) -> Self {
        Self {
            streams: DashMap::new(),
            histories: DashMap::new(),
            config,
        }
    }

    /// Create a manager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SseConfig::default())
    }

    /// Install a fresh stream for the session, closing any stream already
    /// registered for it. Returns the stream handle and the SSE response.
    pub fn create_stream(&self, session_id: &str) -> (Arc<SseStream>, Response) {
        let history = self.history_for(session_id);
        let (stream, response) = SseStream::new(
            session_id.to_string(),
            history,
            self.config.keep_alive_interval,
        );

        if let Some(previous) = self.streams.insert(session_id.to_string(), Arc::clone(&stream)) {
            previous.close();
        }
        debug!(session = %session_id, "sse stream installed");
        (stream, response)
    }

    /// Reconnect with a `Last-Event-Id`. The id is parsed on its final
    /// colon (session ids may contain colons); a fresh stream is installed
    /// and every buffered event with a strictly greater sequence is
    /// replayed in order. An invalid or foreign id attaches a fresh stream
    /// with no replay.
    pub async fn handle_reconnect(
        &self,
        session_id: &str,
        last_event_id: &str,
    ) -> (Arc<SseStream>, Response) {
        let (stream, response) = self.create_stream(session_id);

        let Some(after) = parse_last_event_id(session_id, last_event_id) else {
            warn!(session = %session_id, last_event_id, "ignoring unparseable Last-Event-Id");
            return (stream, response);
        };

        let pending = self.history_for(session_id);
        let events = {
            let history = match pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            history.events_after(after)
        };

        for event in &events {
            if stream.replay_event(event).await.is_err() {
                break;
            }
        }
        if !events.is_empty() {
            debug!(session = %session_id, replayed = events.len(), "sse replay complete");
        }

        (stream, response)
    }

    /// Send a message on the session's current stream. Returns `true` iff
    /// an active stream existed and accepted the event.
    pub async fn send_event(&self, session_id: &str, message: &JsonRpcMessage) -> bool {
        self.send_event_inner(session_id, message, None).await
    }

    /// Send a typed event on the session's current stream.
    pub async fn send_event_with_type(
        &self,
        session_id: &str,
        message: &JsonRpcMessage,
        event_type: &str,
    ) -> bool {
        self.send_event_inner(session_id, message, Some(event_type)).await
    }

    async fn send_event_inner(
        &self,
        session_id: &str,
        message: &JsonRpcMessage,
        event_type: Option<&str>,
    ) -> bool {
        let Some(stream) = self.streams.get(session_id).map(|e| Arc::clone(e.value())) else {
            return false;
        };

        let result = match event_type {
            Some(event_type) => stream.send_with_type(message, event_type).await,
            None => stream.send(message).await,
        };

        match result {
            Ok(_) => true,
            Err(_) => {
                // The write discovered a dead client; drop the stream if it
                // is still the current one for this session.
                self.streams
                    .remove_if(session_id, |_, current| Arc::ptr_eq(current, &stream));
                false
            }
        }
    }

    /// Close and remove the session's stream, keeping its history.
    pub fn close_stream(&self, session_id: &str) -> bool {
        match self.streams.remove(session_id) {
            Some((_, stream)) => {
                stream.close();
                true
            }
            None => false,
        }
    }

    /// Drop all SSE state for a destroyed session, history included.
    pub fn remove_session(&self, session_id: &str) {
        self.close_stream(session_id);
        self.histories.remove(session_id);
    }

    /// Whether the session currently has an active stream.
    pub fn has_active_stream(&self, session_id: &str) -> bool {
        self.streams
            .get(session_id)
            .map(|entry| entry.value().is_active())
            .unwrap_or(false)
    }

    /// Number of registered streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn history_for(&self, session_id: &str) -> Arc<Mutex<EventHistory>> {
        Arc::clone(
            self.histories
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(EventHistory::new(self.config.buffer_size))))
                .value(),
        )
    }
}

impl std::fmt::Debug for SseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseManager")
            .field("streams", &self.streams.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Parse `<session>:<n>` on the final colon. Returns the sequence only when
/// the session prefix matches and the suffix is numeric.
fn parse_last_event_id(session_id: &str, last_event_id: &str) -> Option<u64> {
    let (prefix, suffix) = last_event_id.rsplit_once(':')?;
    if prefix != session_id {
        return None;
    }
    suffix.parse::<u64>().ok()
}
