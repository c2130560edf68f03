//! Request Correlator
//!
//! Turns the single duplex connection into many independent async calls.
//! Each outbound request is stamped with a fresh correlation token and
//! registered in a pending-call table; the matching response resolves the
//! caller's completion slot. A connection loss sweeps every outstanding
//! call so no caller waits across a reconnect boundary.
//!
//! The correlator never interprets payload semantics: an error-shaped field
//! inside a well-formed response is a successful correlation whose result
//! happens to be an application-level error value.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::application::events::{ClientEvent, EventBus};
use crate::application::ports::{Transport, TransportError};
use crate::domain::envelope::Envelope;

// =============================================================================
// Error Type
// =============================================================================

/// Errors a dispatched call can complete with.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// The transport rejected the outbound request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection dropped while the call was outstanding. Callers
    /// re-issue if desired; the core never retries.
    #[error("connection lost")]
    ConnectionLost,

    /// The client was torn down while the call was outstanding.
    #[error("client closed")]
    ClientClosed,
}

// =============================================================================
// Pending Calls
// =============================================================================

struct PendingCall {
    slot: oneshot::Sender<Result<Envelope, CallError>>,
    created_at: Instant,
}

/// Correlates outbound requests with inbound responses.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    events: EventBus,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCall>>,
}

impl Correlator {
    /// Create a correlator sending through the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, events: EventBus) -> Self {
        Self {
            transport,
            events,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Send a request and await its correlated response.
    ///
    /// Stamps a fresh correlation token, registers a pending call, sends the
    /// envelope, and suspends the calling task until the matching response
    /// arrives or the pending set is swept.
    ///
    /// # Errors
    ///
    /// - [`CallError::Transport`] if the send itself fails.
    /// - [`CallError::ConnectionLost`] if the connection drops first.
    /// - [`CallError::ClientClosed`] if the client is torn down first.
    pub async fn dispatch(&self, request: Envelope) -> Result<Envelope, CallError> {
        self.dispatch_tracked(request, |_| {}).await
    }

    /// [`dispatch`](Self::dispatch), reporting the stamped correlation token
    /// to `track` once the pending slot exists but before the envelope
    /// reaches the transport, so the caller can index the in-flight call
    /// ahead of any response.
    ///
    /// # Errors
    ///
    /// Same as [`dispatch`](Self::dispatch).
    pub async fn dispatch_tracked<F>(
        &self,
        mut request: Envelope,
        track: F,
    ) -> Result<Envelope, CallError>
    where
        F: FnOnce(u64),
    {
        let method = request.method().map(str::to_string);
        let (req_id, rx) = self.register();
        request.set_req_id(req_id);
        track(req_id);

        tracing::debug!(req_id, method = method.as_deref(), "dispatching request");
        self.events.emit(ClientEvent::RequestDispatched {
            req_id,
            method,
        });

        if let Err(error) = self.transport.send(request.to_json()).await {
            // Never leave a slot behind for a request that was never sent.
            self.pending.lock().remove(&req_id);
            return Err(error.into());
        }

        rx.await.map_err(|_| CallError::ClientClosed)?
    }

    /// Allocate a correlation token and its completion slot.
    ///
    /// Tokens are monotonic and never reused while a pending call for them
    /// is outstanding.
    fn register(&self) -> (u64, oneshot::Receiver<Result<Envelope, CallError>>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();

        let req_id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };

        let previous = pending.insert(
            req_id,
            PendingCall {
                slot: tx,
                created_at: Instant::now(),
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused while outstanding");

        (req_id, rx)
    }

    /// Resolve the pending call matching `req_id` with `envelope`.
    ///
    /// Gives the envelope back when no such call is outstanding (duplicate,
    /// stale response after a sweep, or a push that routes by subscription
    /// id) so the caller can fall back without paying for a clone.
    ///
    /// # Errors
    ///
    /// Returns the unconsumed envelope.
    pub fn resolve(&self, req_id: u64, envelope: Envelope) -> Result<(), Envelope> {
        let Some(call) = self.pending.lock().remove(&req_id) else {
            return Err(envelope);
        };

        tracing::trace!(
            req_id,
            age_ms = call.created_at.elapsed().as_millis(),
            "resolving pending call"
        );
        self.events.emit(ClientEvent::ResponseReceived { req_id });

        // The caller may have given up; a dropped receiver is not an error.
        let _ = call.slot.send(Ok(envelope));
        Ok(())
    }

    /// Reject every outstanding call with `error` and clear the table.
    pub fn sweep(&self, error: &CallError) {
        let drained: Vec<(u64, PendingCall)> = self.pending.lock().drain().collect();
        if drained.is_empty() {
            return;
        }

        tracing::warn!(count = drained.len(), %error, "sweeping pending calls");
        for (_, call) in drained {
            let _ = call.slot.send(Err(error.clone()));
        }
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
