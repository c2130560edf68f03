//! Stream State and Listener Registry
//!
//! Domain types for live server-push streams. A stream is created by a
//! subscribe-shaped request, keyed by the subscription id the server assigns
//! on the first response, and fans each push out to its registered
//! listeners. A stream outlives individual listeners: removing the last
//! listener does not end the stream by itself.
//!
//! # State Machine
//!
//! ```text
//! Pending ──first response with subscription id──► Active
//! Pending/Active ──caller cancel──► Cancelled
//! Active ──server end-of-stream──► Completed
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use super::envelope::Envelope;
use super::fingerprint::Fingerprint;

/// Local identifier for a stream, unique within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// Registration handle for one listener, used for precise removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callback invoked for every push delivered to a stream.
///
/// A returned error is isolated to this listener: it is surfaced on the
/// diagnostic channel and never stops delivery to later listeners.
pub type PushListener = Box<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Subscribe request sent; no subscription id known yet.
    Pending,
    /// Receiving pushes.
    Active,
    /// Server signalled natural end-of-stream.
    Completed,
    /// Caller cancelled the stream.
    Cancelled,
}

impl StreamState {
    /// Whether the stream can never receive another push.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Snapshot of a stream's metadata, handed to `cancel_all` predicates.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Local stream identifier.
    pub id: StreamId,
    /// Fingerprint of the originating subscribe request.
    pub fingerprint: Fingerprint,
    /// Server-assigned subscription id, if already known.
    pub subscription_id: Option<String>,
    /// Current lifecycle state.
    pub state: StreamState,
    /// Method name of the originating request (e.g. `"ticks"`).
    pub method: Option<String>,
}

// =============================================================================
// Stream Record
// =============================================================================

/// Mutable bookkeeping for one stream, shared between the subscription
/// manager and every handle pointing at it.
pub struct StreamRecord {
    id: StreamId,
    fingerprint: Fingerprint,
    method: Option<String>,
    state: StreamState,
    subscription_id: Option<String>,
    first_response: Option<Envelope>,
    listeners: Vec<(ListenerId, PushListener)>,
    next_listener: u64,
}

impl StreamRecord {
    /// Create a new record in `Pending` state.
    #[must_use]
    pub fn new(id: StreamId, fingerprint: Fingerprint, method: Option<String>) -> Self {
        Self {
            id,
            fingerprint,
            method,
            state: StreamState::Pending,
            subscription_id: None,
            first_response: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Local stream identifier.
    #[must_use]
    pub const fn id(&self) -> StreamId {
        self.id
    }

    /// Fingerprint of the originating request.
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Server-assigned subscription id, once known.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// The first response that activated this stream, if any.
    #[must_use]
    pub const fn first_response(&self) -> Option<&Envelope> {
        self.first_response.as_ref()
    }

    /// Transition `Pending -> Active` with the server-assigned id.
    ///
    /// Returns `false` without touching the record when the stream is no
    /// longer pending: activated on another path, or cancelled while the
    /// subscribe was in flight.
    pub fn activate(&mut self, subscription_id: String, first_response: Envelope) -> bool {
        if self.state != StreamState::Pending {
            return false;
        }
        self.state = StreamState::Active;
        self.subscription_id = Some(subscription_id);
        self.first_response = Some(first_response);
        true
    }

    /// Move to a terminal state. No-op if already terminal.
    ///
    /// Returns `true` if the state actually changed.
    pub fn finish(&mut self, state: StreamState) -> bool {
        debug_assert!(state.is_terminal(), "finish requires a terminal state");
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }

    /// Register a listener; pushes are delivered in registration order.
    pub fn add_listener(&mut self, listener: PushListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener by its handle. Returns `false` if unknown.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Drop every listener.
    pub fn detach_all(&mut self) {
        self.listeners.clear();
    }

    /// Deliver one push to every listener, in registration order.
    ///
    /// Failures are collected and returned; they never abort fan-out. A
    /// terminal or pending stream delivers nothing.
    pub fn fan_out(&self, envelope: &Envelope) -> Vec<(ListenerId, anyhow::Error)> {
        if self.state != StreamState::Active {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for (id, listener) in &self.listeners {
            if let Err(error) = listener(envelope) {
                failures.push((*id, error));
            }
        }
        failures
    }

    /// Metadata snapshot for predicates and diagnostics.
    #[must_use]
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.id,
            fingerprint: self.fingerprint.clone(),
            subscription_id: self.subscription_id.clone(),
            state: self.state,
            method: self.method.clone(),
        }
    }
}

impl std::fmt::Debug for StreamRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("subscription_id", &self.subscription_id)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

/// A stream record shared between the manager and its handles.
pub type SharedStream = Arc<Mutex<StreamRecord>>;

// =============================================================================
// Stream Handle
// =============================================================================

/// Caller-facing handle to a live stream.
///
/// Handles are cheap to clone; all of them point at the same underlying
/// stream. Listener registration and cancellation go through the client so
/// configured lifecycle policy applies.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    record: SharedStream,
}

impl StreamHandle {
    /// Wrap a shared record.
    #[must_use]
    pub fn new(record: SharedStream) -> Self {
        Self { record }
    }

    /// Local stream identifier.
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.record.lock().id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.record.lock().state()
    }

    /// Server-assigned subscription id, once known.
    #[must_use]
    pub fn subscription_id(&self) -> Option<String> {
        self.record.lock().subscription_id().map(str::to_string)
    }

    /// The response that activated this stream, if it is active yet.
    #[must_use]
    pub fn first_response(&self) -> Option<Envelope> {
        self.record.lock().first_response().cloned()
    }

    /// Number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.record.lock().listener_count()
    }

    /// Metadata snapshot.
    #[must_use]
    pub fn info(&self) -> StreamInfo {
        self.record.lock().info()
    }

    /// Access the shared record (crate-internal).
    pub(crate) fn record(&self) -> &SharedStream {
        &self.record
    }
}

// =============================================================================
// Tests
// =============================================================================
