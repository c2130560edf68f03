//! Client Facade
//!
//! Composes the correlator, subscription manager, and cache store around
//! one transport collaborator. A single router task owns the inbound path:
//! every transport event is processed in arrival order, so the pending-call
//! and stream tables are never mutated concurrently from inbound handling.
//!
//! All shared tables are owned by one client instance and reached only
//! through its operations; multiple independent connections can coexist in
//! one process and tear down deterministically.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::events::{ClientEvent, EventBus};
use crate::application::ports::{Transport, TransportEvent};
use crate::application::services::correlator::{CallError, Correlator};
use crate::application::services::subscriptions::{SubscribeOutcome, SubscriptionManager};
use crate::domain::cache::{CacheKind, CacheStore, InMemoryCache};
use crate::domain::envelope::{Envelope, Inbound};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::stream::{ListenerId, PushListener, StreamHandle, StreamInfo};

// =============================================================================
// Configuration
// =============================================================================

/// Behavioral configuration for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Methods whose responses are safe to reuse verbatim for an identical
    /// fingerprint. Static reference data by default.
    pub cacheable_methods: HashSet<String>,
    /// Cancel a stream's remote subscription when its last listener is
    /// removed. Off by default: the stream stays re-attachable.
    pub cancel_on_zero_listeners: bool,
    /// Capacity of the diagnostic event channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let cacheable_methods = [
            "active_symbols",
            "asset_index",
            "contracts_for",
            "landing_company",
            "payout_currencies",
            "residence_list",
            "states_list",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        Self {
            cacheable_methods,
            cancel_on_zero_listeners: false,
            event_capacity: 256,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Multiplexing client over one WebSocket connection.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use derivws::{ClientConfig, ClientSettings, DerivClient, WebSocketTransport};
///
/// # async fn run() -> anyhow::Result<()> {
/// let settings = ClientSettings::from_env()?;
/// let (transport, inbound) = WebSocketTransport::connect(&settings).await?;
/// let client = DerivClient::new(transport, inbound, ClientConfig::default());
///
/// let pong = client.ping().await?;
/// assert_eq!(pong.msg_type(), Some("ping"));
///
/// client.teardown().await?;
/// # Ok(())
/// # }
/// ```
pub struct DerivClient {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    subscriptions: Arc<SubscriptionManager>,
    cache: Arc<dyn CacheStore>,
    events: EventBus,
    config: ClientConfig,
    cancel: CancellationToken,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl DerivClient {
    /// Create a client with the default in-memory cache store.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<TransportEvent>,
        config: ClientConfig,
    ) -> Self {
        Self::with_cache(transport, inbound, config, Arc::new(InMemoryCache::new()))
    }

    /// Create a client with a caller-provided cache store.
    #[must_use]
    pub fn with_cache(
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<TransportEvent>,
        config: ClientConfig,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let correlator = Arc::new(Correlator::new(Arc::clone(&transport), events.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&correlator),
            Arc::clone(&cache),
            events.clone(),
        ));

        let cancel = CancellationToken::new();
        let router = tokio::spawn(route_inbound(
            inbound,
            Arc::clone(&correlator),
            Arc::clone(&subscriptions),
            events.clone(),
            cancel.clone(),
        ));

        Self {
            transport,
            correlator,
            subscriptions,
            cache,
            events,
            config,
            cancel,
            router: Mutex::new(Some(router)),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Send a request and await its response.
    ///
    /// Cache-eligible requests short-circuit on a hit without touching the
    /// transport; misses are dispatched and their (non-error) responses
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`CallError`] for transport failure, connection loss, or
    /// teardown. An error-shaped response body is `Ok`: inspect
    /// [`Envelope::error`].
    pub async fn send(&self, request: Envelope) -> Result<Envelope, CallError> {
        let fingerprint = Fingerprint::of(&request);
        let eligible = self.is_cache_eligible(&request);

        if eligible
            && let Some(entry) = self.cache.lookup(&fingerprint)
            && entry.kind == CacheKind::OneShot
        {
            tracing::debug!(%fingerprint, "serving response from cache");
            self.events.emit(ClientEvent::CacheHit {
                fingerprint: fingerprint.to_string(),
            });
            return Ok(entry.value);
        }

        let response = self.correlator.dispatch(request).await?;

        // Errors are often transient; only clean responses are reusable.
        if eligible && response.error().is_none() {
            self.cache
                .store(fingerprint, response.clone(), CacheKind::OneShot);
        }

        Ok(response)
    }

    fn is_cache_eligible(&self, request: &Envelope) -> bool {
        !request.is_subscribe_request()
            && request
                .method()
                .is_some_and(|m| self.config.cacheable_methods.contains(m))
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Open (or share) a push stream for a subscribe-shaped request.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from the initial dispatch.
    pub async fn subscribe(&self, request: Envelope) -> Result<SubscribeOutcome, CallError> {
        self.subscriptions.open_stream(request).await
    }

    /// Register a push listener on a stream.
    pub fn add_listener(&self, stream: &StreamHandle, listener: PushListener) -> ListenerId {
        stream.record().lock().add_listener(listener)
    }

    /// Remove a listener by its registration handle.
    ///
    /// With `cancel_on_zero_listeners` configured, removing the last
    /// listener also cancels the stream's remote subscription.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from the policy-driven cancel.
    pub async fn remove_listener(
        &self,
        stream: &StreamHandle,
        listener: ListenerId,
    ) -> Result<bool, CallError> {
        let (removed, remaining) = {
            let mut record = stream.record().lock();
            let removed = record.remove_listener(listener);
            (removed, record.listener_count())
        };

        if removed && remaining == 0 && self.config.cancel_on_zero_listeners {
            tracing::debug!("last listener removed; cancelling stream per policy");
            self.unsubscribe(stream).await?;
        }

        Ok(removed)
    }

    /// Cancel a stream. No-op for Completed/Cancelled streams.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from the `forget` dispatch.
    pub async fn unsubscribe(&self, stream: &StreamHandle) -> Result<(), CallError> {
        self.subscriptions.cancel(stream).await
    }

    /// Cancel every stream whose metadata matches `predicate`.
    ///
    /// # Errors
    ///
    /// Returns the first [`CallError`] encountered; every matching stream
    /// is attempted regardless.
    pub async fn unsubscribe_all<F>(&self, predicate: F) -> Result<(), CallError>
    where
        F: Fn(&StreamInfo) -> bool,
    {
        self.subscriptions.cancel_all(predicate).await
    }

    // =========================================================================
    // Cache Control
    // =========================================================================

    /// Forget the cached response for a request's fingerprint.
    pub fn invalidate(&self, request: &Envelope) {
        self.cache.invalidate(&Fingerprint::of(request));
    }

    /// Forget every cached response.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// The cache store backing this client.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Subscribe to the diagnostic event channel.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Number of calls currently awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Tear the client down: cancel every stream, reject every pending
    /// call, clear the cache, stop the router, and release the transport.
    ///
    /// # Errors
    ///
    /// Returns the first [`CallError`] raised while unwinding; teardown
    /// always runs to completion regardless.
    pub async fn teardown(&self) -> Result<(), CallError> {
        tracing::info!("tearing down client");

        let cancel_result = self.subscriptions.cancel_all(|_| true).await;
        self.correlator.sweep(&CallError::ClientClosed);
        self.cache.invalidate_all();

        self.cancel.cancel();
        let router = self.router.lock().take();
        if let Some(router) = router {
            let _ = router.await;
        }

        let close_result = self.transport.close().await;

        cancel_result?;
        close_result.map_err(CallError::from)
    }
}

impl std::fmt::Debug for DerivClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivClient")
            .field("pending_calls", &self.correlator.pending_count())
            .field("streams", &self.subscriptions.stream_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Inbound Router
// =============================================================================

/// The single inbound path: processes transport events one at a time, in
/// arrival order.
async fn route_inbound(
    mut inbound: mpsc::Receiver<TransportEvent>,
    correlator: Arc<Correlator>,
    subscriptions: Arc<SubscriptionManager>,
    events: EventBus,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("router cancelled");
                return;
            }
            event = inbound.recv() => event,
        };

        match event {
            None => {
                tracing::debug!("transport event channel closed");
                return;
            }
            Some(TransportEvent::Opened) => {
                tracing::info!("connection open");
                events.emit(ClientEvent::Connected);
            }
            Some(TransportEvent::Closed { reason }) => {
                tracing::warn!(reason = reason.as_deref(), "connection closed");
                correlator.sweep(&CallError::ConnectionLost);
                events.emit(ClientEvent::Disconnected { reason });
            }
            Some(TransportEvent::Message(text)) => match Envelope::from_json(&text) {
                Ok(envelope) => {
                    route_envelope(&correlator, &subscriptions, &events, envelope);
                }
                Err(error) => {
                    tracing::warn!(%error, "dropping undecodable inbound message");
                    events.emit(ClientEvent::UnmatchedEnvelope {
                        summary: format!("undecodable: {error}"),
                    });
                }
            },
        }
    }
}

fn route_envelope(
    correlator: &Correlator,
    subscriptions: &SubscriptionManager,
    events: &EventBus,
    envelope: Envelope,
) {
    match Inbound::classify(envelope) {
        Inbound::CorrelatedResponse { req_id, envelope } => {
            // Activate a pending stream before completing the call, so a
            // push already queued behind this response finds its stream.
            subscriptions.note_response(req_id, &envelope);

            let envelope = match correlator.resolve(req_id, envelope) {
                Ok(()) => return,
                Err(envelope) => envelope,
            };
            // Stale or duplicate correlation; fall back to subscription
            // routing before declaring the envelope unroutable.
            if let Some(subscription_id) = envelope.subscription_id() {
                let handled = if envelope.is_stream_end() {
                    subscriptions.handle_stream_end(subscription_id)
                } else {
                    subscriptions.handle_push(subscription_id, &envelope)
                };
                if handled {
                    return;
                }
            }
            drop_unmatched(events, &envelope, "no pending call");
        }
        Inbound::SubscriptionPush {
            subscription_id,
            envelope,
        } => {
            if !subscriptions.handle_push(&subscription_id, &envelope) {
                drop_unmatched(events, &envelope, "unknown subscription");
            }
        }
        Inbound::StreamEnd {
            subscription_id,
            envelope,
        } => {
            if !subscriptions.handle_stream_end(&subscription_id) {
                drop_unmatched(events, &envelope, "unknown subscription");
            }
        }
        Inbound::Unroutable { envelope } => {
            drop_unmatched(events, &envelope, "no routing token");
        }
    }
}

fn drop_unmatched(events: &EventBus, envelope: &Envelope, why: &str) {
    tracing::warn!(
        msg_type = envelope.msg_type(),
        req_id = envelope.req_id(),
        why,
        "dropping unmatched envelope"
    );
    events.emit(ClientEvent::UnmatchedEnvelope {
        summary: format!(
            "{} (msg_type: {})",
            why,
            envelope.msg_type().unwrap_or("?")
        ),
    });
}
