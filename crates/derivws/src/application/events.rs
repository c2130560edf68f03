//! Diagnostic Event Channel
//!
//! A broadcast channel carrying the client's observable lifecycle: connect,
//! disconnect, dispatched requests, received responses, cache hits, dropped
//! envelopes, and listener faults. Consumers subscribe for receivers; events
//! sent with no active receiver are discarded.

use tokio::sync::broadcast;

use crate::domain::stream::ListenerId;

/// Diagnostic events emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The transport reported an open connection.
    Connected,
    /// The transport reported a closed connection.
    Disconnected {
        /// Close reason, if the transport provided one.
        reason: Option<String>,
    },
    /// An outbound request was handed to the transport.
    RequestDispatched {
        /// Correlation token stamped on the request.
        req_id: u64,
        /// Method name of the request, if detectable.
        method: Option<String>,
    },
    /// An inbound response completed a pending call.
    ResponseReceived {
        /// Correlation token echoed by the server.
        req_id: u64,
    },
    /// A cache-eligible request was served without network traffic.
    CacheHit {
        /// Canonical fingerprint of the request.
        fingerprint: String,
    },
    /// An inbound envelope matched no pending call and no stream; dropped.
    UnmatchedEnvelope {
        /// Short description of the dropped envelope.
        summary: String,
    },
    /// A push listener returned an error; fan-out continued without it.
    ListenerError {
        /// Subscription the push belonged to.
        subscription_id: String,
        /// The failing listener's registration handle.
        listener: ListenerId,
        /// The error the listener returned.
        message: String,
    },
}

// =============================================================================
// Event Bus
// =============================================================================

/// Broadcast hub for [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    /// Emit an event to all subscribers. Discarded when nobody listens.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    /// Get a new receiver for diagnostic events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// =============================================================================
// Tests
// =============================================================================
