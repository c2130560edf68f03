//! Subscription Manager
//!
//! Layers stream lifecycle on top of the correlator. A subscribe-shaped
//! request is dispatched exactly like a one-shot call; the first response
//! both completes that call and, when it carries a subscription id,
//! activates a stream keyed by that id. Later pushes bypass the correlator
//! and fan out to the stream's listeners in registration order.
//!
//! Streams are shared: a second subscribe with an identical fingerprint
//! attaches to the existing Pending/Active stream instead of generating
//! duplicate remote subscription traffic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::application::events::{ClientEvent, EventBus};
use crate::application::services::correlator::{CallError, Correlator};
use crate::domain::cache::{CacheKind, CacheStore};
use crate::domain::envelope::Envelope;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::stream::{
    SharedStream, StreamHandle, StreamId, StreamRecord, StreamState,
};

// =============================================================================
// Subscribe Outcome
// =============================================================================

/// Result of a subscribe-shaped request.
///
/// The server decides: a response carrying a subscription id opens a
/// stream, anything else behaved as a one-shot call.
#[derive(Debug)]
pub enum SubscribeOutcome {
    /// A live stream was opened (or an existing identical stream shared).
    Stream(StreamHandle),
    /// The server answered without a subscription id; no stream exists.
    OneShot(Envelope),
}

impl SubscribeOutcome {
    /// The stream handle, if a stream was opened.
    #[must_use]
    pub fn stream(self) -> Option<StreamHandle> {
        match self {
            Self::Stream(handle) => Some(handle),
            Self::OneShot(_) => None,
        }
    }
}

// =============================================================================
// Tables
// =============================================================================

#[derive(Default)]
struct Tables {
    streams: HashMap<StreamId, SharedStream>,
    by_fingerprint: HashMap<Fingerprint, StreamId>,
    by_subscription: HashMap<String, StreamId>,
    /// Correlation tokens of subscribes still awaiting their first
    /// response, so the inbound path can activate the stream the moment
    /// that response is processed.
    pending_by_req: HashMap<u64, StreamId>,
}

/// Tracks live server-push streams and routes pushes to their listeners.
pub struct SubscriptionManager {
    correlator: Arc<Correlator>,
    cache: Arc<dyn CacheStore>,
    events: EventBus,
    next_stream: AtomicU64,
    tables: Mutex<Tables>,
}

impl SubscriptionManager {
    /// Create a manager dispatching through the given correlator.
    #[must_use]
    pub fn new(correlator: Arc<Correlator>, cache: Arc<dyn CacheStore>, events: EventBus) -> Self {
        Self {
            correlator,
            cache,
            events,
            next_stream: AtomicU64::new(1),
            tables: Mutex::new(Tables::default()),
        }
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Open (or share) a stream for a subscribe-shaped request.
    ///
    /// An identical fingerprint already Pending or Active attaches to the
    /// existing stream without sending anything. Otherwise the request is
    /// dispatched and the first response decides between a stream and a
    /// one-shot outcome.
    ///
    /// A stream cancelled while its subscribe is still in flight comes back
    /// as an already-Cancelled handle; any subscription the server assigned
    /// in the meantime is revoked remotely.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from the initial dispatch; the provisional
    /// stream is removed on failure.
    pub async fn open_stream(&self, mut request: Envelope) -> Result<SubscribeOutcome, CallError> {
        request.set_subscribe();
        let fingerprint = Fingerprint::of(&request);
        let method = request.method().map(str::to_string);

        let (stream_id, record) = {
            let mut tables = self.tables.lock();

            if let Some(existing) = Self::live_stream(&mut tables, &fingerprint) {
                tracing::debug!(%fingerprint, "sharing existing stream");
                return Ok(SubscribeOutcome::Stream(StreamHandle::new(existing)));
            }

            let stream_id = StreamId(self.next_stream.fetch_add(1, Ordering::Relaxed));
            let record: SharedStream = Arc::new(Mutex::new(StreamRecord::new(
                stream_id,
                fingerprint.clone(),
                method,
            )));
            tables.streams.insert(stream_id, Arc::clone(&record));
            tables.by_fingerprint.insert(fingerprint.clone(), stream_id);
            (stream_id, record)
        };

        let mut in_flight = None;
        let result = self
            .correlator
            .dispatch_tracked(request, |req_id| {
                in_flight = Some(req_id);
                self.tables.lock().pending_by_req.insert(req_id, stream_id);
            })
            .await;

        // The inbound path pops this index when it sees the response; cover
        // the paths where it never ran (send failure, swept call).
        if let Some(req_id) = in_flight {
            self.tables.lock().pending_by_req.remove(&req_id);
        }

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                self.discard_stream(stream_id, &fingerprint);
                return Err(error);
            }
        };

        if response.error().is_some() {
            self.discard_stream(stream_id, &fingerprint);
            return Ok(SubscribeOutcome::OneShot(response));
        }

        let Some(subscription_id) = response.subscription_id().map(str::to_string) else {
            // The server treated the request as one-shot.
            self.discard_stream(stream_id, &fingerprint);
            return Ok(SubscribeOutcome::OneShot(response));
        };

        // The inbound path may have activated the stream already, and a
        // cancel may have landed while the subscribe was in flight.
        let (state_before, already_assigned) = {
            let mut rec = record.lock();
            let before = rec.state();
            if before == StreamState::Pending {
                rec.activate(subscription_id.clone(), response.clone());
            }
            (before, rec.subscription_id().is_some())
        };

        match state_before {
            StreamState::Pending => {
                self.tables
                    .lock()
                    .by_subscription
                    .insert(subscription_id.clone(), stream_id);
                self.cache
                    .store(fingerprint, response, CacheKind::StreamLatest);
                tracing::info!(subscription_id, "stream active");
            }
            StreamState::Active => {
                // Indexed on the inbound path before the call resolved.
            }
            StreamState::Completed | StreamState::Cancelled => {
                // Cancelled before the id was ever assigned: local cleanup
                // already ran, but the server-side subscription would leak
                // without a forget. A stream that activated first has its
                // forget sent by the cancel path instead.
                if !already_assigned {
                    tracing::info!(
                        subscription_id,
                        "revoking subscription assigned to a cancelled stream"
                    );
                    let mut forget = Envelope::new();
                    forget.insert("forget", Value::from(subscription_id));
                    if let Err(error) = self.correlator.dispatch(forget).await {
                        tracing::warn!(%error, "revoke failed; remote stream may leak");
                    }
                }
            }
        }

        Ok(SubscribeOutcome::Stream(StreamHandle::new(record)))
    }

    /// Observe a correlated response on the inbound path.
    ///
    /// When the token belongs to a subscribe still in flight and the
    /// response carries a subscription id, the pending stream is activated
    /// and indexed before the caller's completion slot resolves, so a push
    /// queued right behind the first response routes to the stream instead
    /// of being dropped.
    pub fn note_response(&self, req_id: u64, response: &Envelope) {
        let record = {
            let mut tables = self.tables.lock();
            let Some(stream_id) = tables.pending_by_req.remove(&req_id) else {
                return;
            };
            let Some(record) = tables.streams.get(&stream_id) else {
                return;
            };
            Arc::clone(record)
        };

        if response.error().is_some() {
            // The awaiting caller discards the provisional stream.
            return;
        }
        let Some(subscription_id) = response.subscription_id().map(str::to_string) else {
            return;
        };

        let (activated, stream_id, fingerprint) = {
            let mut rec = record.lock();
            let activated = rec.activate(subscription_id.clone(), response.clone());
            (activated, rec.id(), rec.fingerprint().clone())
        };
        if !activated {
            // Cancelled while in flight; the awaiting caller revokes it.
            return;
        }

        self.tables
            .lock()
            .by_subscription
            .insert(subscription_id.clone(), stream_id);
        self.cache
            .store(fingerprint, response.clone(), CacheKind::StreamLatest);
        tracing::info!(subscription_id, "stream active");
    }

    /// Look up a Pending/Active stream by fingerprint, pruning a stale
    /// mapping to a terminal stream.
    fn live_stream(tables: &mut Tables, fingerprint: &Fingerprint) -> Option<SharedStream> {
        let stream_id = *tables.by_fingerprint.get(fingerprint)?;
        let record = tables.streams.get(&stream_id)?;
        if record.lock().state().is_terminal() {
            tables.by_fingerprint.remove(fingerprint);
            return None;
        }
        Some(Arc::clone(record))
    }

    /// Remove a provisional stream that never activated.
    fn discard_stream(&self, stream_id: StreamId, fingerprint: &Fingerprint) {
        let mut tables = self.tables.lock();
        if let Some(record) = tables.streams.remove(&stream_id) {
            record.lock().finish(StreamState::Cancelled);
        }
        if tables.by_fingerprint.get(fingerprint) == Some(&stream_id) {
            tables.by_fingerprint.remove(fingerprint);
        }
    }

    // =========================================================================
    // Inbound Routing
    // =========================================================================

    /// Deliver one push to the stream owning `subscription_id`.
    ///
    /// Returns `false` when no such stream exists. A locally cancelled or
    /// completed stream swallows the push without fan-out.
    pub fn handle_push(&self, subscription_id: &str, envelope: &Envelope) -> bool {
        let Some(record) = self.stream_by_subscription(subscription_id) else {
            return false;
        };

        let (fingerprint, failures) = {
            let record = record.lock();
            if record.state() != StreamState::Active {
                tracing::trace!(subscription_id, "push for non-active stream ignored");
                return true;
            }
            (record.fingerprint().clone(), record.fan_out(envelope))
        };

        self.cache
            .store(fingerprint, envelope.clone(), CacheKind::StreamLatest);

        for (listener, error) in failures {
            tracing::warn!(subscription_id, ?listener, %error, "push listener failed");
            self.events.emit(ClientEvent::ListenerError {
                subscription_id: subscription_id.to_string(),
                listener,
                message: error.to_string(),
            });
        }
        true
    }

    /// Handle a server end-of-stream marker.
    ///
    /// Transitions the stream to Completed with the same cleanup as a
    /// confirmed cancel. Returns `false` when no such stream exists.
    pub fn handle_stream_end(&self, subscription_id: &str) -> bool {
        let Some(record) = self.stream_by_subscription(subscription_id) else {
            return false;
        };

        tracing::info!(subscription_id, "server ended stream");
        self.finish_stream(&record, StreamState::Completed);
        true
    }

    fn stream_by_subscription(&self, subscription_id: &str) -> Option<SharedStream> {
        let tables = self.tables.lock();
        let stream_id = tables.by_subscription.get(subscription_id)?;
        tables.streams.get(stream_id).map(Arc::clone)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancel a stream.
    ///
    /// The stream is treated as cancelled locally the instant this is
    /// called: no further push is fanned out while the remote `forget`
    /// confirmation is in flight. Cancelling a Completed/Cancelled stream
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from the `forget` dispatch; local cleanup
    /// has already happened by then.
    pub async fn cancel(&self, handle: &StreamHandle) -> Result<(), CallError> {
        let subscription_id = {
            let mut record = handle.record().lock();
            if !record.finish(StreamState::Cancelled) {
                return Ok(());
            }
            record.subscription_id().map(str::to_string)
        };

        // A later identical subscribe must open a fresh remote stream.
        let fingerprint = handle.info().fingerprint;
        {
            let mut tables = self.tables.lock();
            if tables.by_fingerprint.get(&fingerprint) == Some(&handle.id()) {
                tables.by_fingerprint.remove(&fingerprint);
            }
        }

        let Some(subscription_id) = subscription_id else {
            // Never activated; nothing to forget remotely.
            self.cleanup_stream(handle.id(), &fingerprint, None);
            return Ok(());
        };

        let mut forget = Envelope::new();
        forget.insert("forget", Value::from(subscription_id.clone()));
        let result = self.correlator.dispatch(forget).await;

        self.cleanup_stream(handle.id(), &fingerprint, Some(&subscription_id));
        result.map(|_confirmation| ())
    }

    /// Cancel every non-terminal stream whose metadata matches `predicate`.
    ///
    /// Attempts every matching stream even when individual cancels fail;
    /// the first error is returned after the pass completes.
    ///
    /// # Errors
    ///
    /// Returns the first [`CallError`] encountered, if any.
    pub async fn cancel_all<F>(&self, predicate: F) -> Result<(), CallError>
    where
        F: Fn(&crate::domain::stream::StreamInfo) -> bool,
    {
        let handles: Vec<StreamHandle> = {
            let tables = self.tables.lock();
            tables
                .streams
                .values()
                .filter(|record| {
                    let record = record.lock();
                    !record.state().is_terminal() && predicate(&record.info())
                })
                .map(|record| StreamHandle::new(Arc::clone(record)))
                .collect()
        };

        let mut first_error = None;
        for handle in handles {
            if let Err(error) = self.cancel(&handle).await {
                tracing::warn!(%error, "cancel failed during bulk unsubscribe");
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Final cleanup shared by cancel, end-of-stream, and discard paths.
    fn finish_stream(&self, record: &SharedStream, state: StreamState) {
        let (stream_id, fingerprint, subscription_id) = {
            let mut rec = record.lock();
            rec.finish(state);
            (
                rec.id(),
                rec.fingerprint().clone(),
                rec.subscription_id().map(str::to_string),
            )
        };
        self.cleanup_stream(stream_id, &fingerprint, subscription_id.as_deref());
    }

    fn cleanup_stream(
        &self,
        stream_id: StreamId,
        fingerprint: &Fingerprint,
        subscription_id: Option<&str>,
    ) {
        self.cache.invalidate(fingerprint);

        let record = {
            let mut tables = self.tables.lock();
            if tables.by_fingerprint.get(fingerprint) == Some(&stream_id) {
                tables.by_fingerprint.remove(fingerprint);
            }
            if let Some(id) = subscription_id {
                tables.by_subscription.remove(id);
            }
            tables.streams.remove(&stream_id)
        };

        if let Some(record) = record {
            record.lock().detach_all();
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of tracked (non-removed) streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.tables.lock().streams.len()
    }

    /// Whether any stream is tracked for `subscription_id`.
    #[must_use]
    pub fn knows_subscription(&self, subscription_id: &str) -> bool {
        self.tables
            .lock()
            .by_subscription
            .contains_key(subscription_id)
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("SubscriptionManager")
            .field("streams", &tables.streams.len())
            .field("active_subscriptions", &tables.by_subscription.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{Transport, TransportError};
    use crate::domain::cache::InMemoryCache;

    /// Transport that answers every request inline through the correlator.
    ///
    /// Subscribe-shaped requests get a subscription id derived from the
    /// correlation token; `forget` requests get a bare confirmation. With
    /// `hold_subscribes` set, subscribes are recorded but left pending so a
    /// test can interleave other work before resolving them by hand.
    struct AnsweringTransport {
        correlator: Mutex<Option<Arc<Correlator>>>,
        sent: Mutex<Vec<Envelope>>,
        hold_subscribes: bool,
    }

    impl AnsweringTransport {
        fn new() -> Self {
            Self {
                correlator: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                hold_subscribes: false,
            }
        }

        fn holding() -> Self {
            Self {
                hold_subscribes: true,
                ..Self::new()
            }
        }

        fn attach(&self, correlator: Arc<Correlator>) {
            *self.correlator.lock() = Some(correlator);
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl Transport for AnsweringTransport {
        async fn send(&self, text: String) -> Result<(), TransportError> {
            let request =
                Envelope::from_json(&text).map_err(|e| TransportError::SendFailed(e.to_string()))?;
            let req_id = request.req_id().unwrap();
            self.sent.lock().push(request.clone());

            let mut response = Envelope::new();
            response.set_req_id(req_id);
            if request.is_subscribe_request() {
                if self.hold_subscribes {
                    return Ok(());
                }
                response.insert("msg_type", Value::from("tick"));
                response.insert(
                    "subscription",
                    serde_json::json!({ "id": format!("sub-{req_id}") }),
                );
            } else if request.get("forget").is_some() {
                response.insert("msg_type", Value::from("forget"));
                response.insert("forget", Value::from(1));
            } else {
                response.insert("msg_type", Value::from("ok"));
            }

            let correlator = self.correlator.lock().clone().unwrap();
            let _ = correlator.resolve(req_id, response);
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct Fixture {
        transport: Arc<AnsweringTransport>,
        correlator: Arc<Correlator>,
        cache: Arc<InMemoryCache>,
        manager: Arc<SubscriptionManager>,
    }

    fn fixture() -> Fixture {
        fixture_over(AnsweringTransport::new())
    }

    fn holding_fixture() -> Fixture {
        fixture_over(AnsweringTransport::holding())
    }

    fn fixture_over(transport: AnsweringTransport) -> Fixture {
        let events = EventBus::new(32);
        let transport = Arc::new(transport);
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            events.clone(),
        ));
        transport.attach(Arc::clone(&correlator));
        let cache = Arc::new(InMemoryCache::new());
        let manager = Arc::new(SubscriptionManager::new(
            Arc::clone(&correlator),
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            events,
        ));
        Fixture {
            transport,
            correlator,
            cache,
            manager,
        }
    }

    /// Wait for the transport to see `count` outbound envelopes.
    async fn wait_for_sends(transport: &AnsweringTransport, count: usize) {
        for _ in 0..500 {
            if transport.sent_count() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("transport never saw {count} sends");
    }

    fn ticks(symbol: &str) -> Envelope {
        let mut request = Envelope::new();
        request.insert("ticks", Value::from(symbol));
        request
    }

    fn push_for(subscription_id: &str, quote: f64) -> Envelope {
        Envelope::from_value(serde_json::json!({
            "msg_type": "tick",
            "subscription": { "id": subscription_id },
            "tick": { "quote": quote },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn open_stream_activates_on_subscription_id() {
        let fx = fixture();

        let outcome = fx.manager.open_stream(ticks("R_50")).await.unwrap();
        let handle = outcome.stream().unwrap();

        assert_eq!(handle.state(), StreamState::Active);
        assert!(handle.subscription_id().unwrap().starts_with("sub-"));
        assert_eq!(fx.cache.count_of_kind(CacheKind::StreamLatest), 1);
    }

    #[tokio::test]
    async fn identical_fingerprint_shares_one_stream() {
        let fx = fixture();

        let first = fx.manager.open_stream(ticks("R_50")).await.unwrap();
        let second = fx.manager.open_stream(ticks("R_50")).await.unwrap();

        // Exactly one subscribe envelope crossed the wire.
        assert_eq!(fx.transport.sent_count(), 1);

        let (first, second) = (first.stream().unwrap(), second.stream().unwrap());
        assert_eq!(first.id(), second.id());
        assert_eq!(fx.manager.stream_count(), 1);
    }

    #[tokio::test]
    async fn different_fingerprints_get_distinct_streams() {
        let fx = fixture();

        let a = fx.manager.open_stream(ticks("R_50")).await.unwrap();
        let b = fx.manager.open_stream(ticks("R_100")).await.unwrap();

        assert_eq!(fx.transport.sent_count(), 2);
        assert_ne!(
            a.stream().unwrap().id(),
            b.stream().unwrap().id()
        );
    }

    #[tokio::test]
    async fn pushes_fan_out_and_update_cache() {
        let fx = fixture();
        let handle = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();
        let sub_id = handle.subscription_id().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handle.record().lock().add_listener(Box::new(move |env| {
            sink.lock().push(env.clone());
            Ok(())
        }));

        assert!(fx.manager.handle_push(&sub_id, &push_for(&sub_id, 1.0)));
        assert!(fx.manager.handle_push(&sub_id, &push_for(&sub_id, 2.0)));

        assert_eq!(seen.lock().len(), 2);
        let fingerprint = handle.info().fingerprint;
        assert!(fx.cache.lookup(&fingerprint).is_some());
    }

    #[tokio::test]
    async fn push_for_unknown_subscription_is_unrouted() {
        let fx = fixture();
        assert!(!fx.manager.handle_push("nope", &push_for("nope", 1.0)));
    }

    #[tokio::test]
    async fn cancel_sends_forget_and_cleans_up() {
        let fx = fixture();
        let handle = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();
        let sub_id = handle.subscription_id().unwrap();

        fx.manager.cancel(&handle).await.unwrap();

        assert_eq!(handle.state(), StreamState::Cancelled);
        assert!(!fx.manager.knows_subscription(&sub_id));
        assert_eq!(fx.cache.count_of_kind(CacheKind::StreamLatest), 0);

        let forget_sent = fx
            .transport
            .sent
            .lock()
            .iter()
            .any(|e| e.get("forget").is_some());
        assert!(forget_sent);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let fx = fixture();
        let handle = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();

        fx.manager.cancel(&handle).await.unwrap();
        let sent_after_first = fx.transport.sent_count();

        // Second cancel is a no-op, not an error.
        fx.manager.cancel(&handle).await.unwrap();
        assert_eq!(fx.transport.sent_count(), sent_after_first);
    }

    #[tokio::test]
    async fn cancelled_stream_swallows_pushes() {
        let fx = fixture();
        let handle = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();
        let sub_id = handle.subscription_id().unwrap();

        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        handle.record().lock().add_listener(Box::new(move |_| {
            *counter.lock() += 1;
            Ok(())
        }));

        // Local cancellation applies before any remote confirmation.
        handle.record().lock().finish(StreamState::Cancelled);
        assert!(fx.manager.handle_push(&sub_id, &push_for(&sub_id, 1.0)));
        assert_eq!(*seen.lock(), 0);
    }

    #[tokio::test]
    async fn stream_end_completes_with_cleanup() {
        let fx = fixture();
        let handle = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();
        let sub_id = handle.subscription_id().unwrap();

        assert!(fx.manager.handle_stream_end(&sub_id));

        assert_eq!(handle.state(), StreamState::Completed);
        assert_eq!(handle.listener_count(), 0);
        assert_eq!(fx.cache.count_of_kind(CacheKind::StreamLatest), 0);
        assert_eq!(fx.manager.stream_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_with_predicate() {
        let fx = fixture();
        let r50 = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();
        let r100 = fx
            .manager
            .open_stream(ticks("R_100"))
            .await
            .unwrap()
            .stream()
            .unwrap();

        fx.manager
            .cancel_all(|info| info.method.as_deref() == Some("ticks"))
            .await
            .unwrap();

        assert_eq!(r50.state(), StreamState::Cancelled);
        assert_eq!(r100.state(), StreamState::Cancelled);
        assert_eq!(fx.cache.count_of_kind(CacheKind::StreamLatest), 0);
    }

    #[tokio::test]
    async fn resubscribe_after_cancel_opens_fresh_stream() {
        let fx = fixture();
        let first = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();
        fx.manager.cancel(&first).await.unwrap();

        let second = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(second.state(), StreamState::Active);
    }

    #[tokio::test]
    async fn cancel_while_subscribe_in_flight_revokes_the_stream() {
        let fx = holding_fixture();

        let opener = {
            let manager = Arc::clone(&fx.manager);
            tokio::spawn(async move { manager.open_stream(ticks("R_50")).await })
        };
        wait_for_sends(&fx.transport, 1).await;

        // Attach through dedup while the first response is still in
        // flight, then cancel.
        let pending = fx
            .manager
            .open_stream(ticks("R_50"))
            .await
            .unwrap()
            .stream()
            .unwrap();
        assert_eq!(pending.state(), StreamState::Pending);
        fx.manager.cancel(&pending).await.unwrap();

        // The server answers the original subscribe anyway.
        let req_id = fx.transport.sent.lock()[0].req_id().unwrap();
        let mut response = Envelope::new();
        response.set_req_id(req_id);
        response.insert("msg_type", Value::from("tick"));
        response.insert("subscription", serde_json::json!({ "id": "sub-late" }));
        let _ = fx.correlator.resolve(req_id, response);

        let handle = opener.await.unwrap().unwrap().stream().unwrap();
        assert_eq!(handle.state(), StreamState::Cancelled);
        assert_eq!(fx.manager.stream_count(), 0);
        assert!(!fx.manager.knows_subscription("sub-late"));
        assert_eq!(fx.cache.count_of_kind(CacheKind::StreamLatest), 0);

        // The just-assigned subscription was revoked remotely.
        let revoked = fx
            .transport
            .sent
            .lock()
            .iter()
            .any(|e| e.get("forget") == Some(&Value::from("sub-late")));
        assert!(revoked);
    }

    #[tokio::test]
    async fn inbound_first_response_indexes_stream_before_call_resolves() {
        let fx = holding_fixture();

        let opener = {
            let manager = Arc::clone(&fx.manager);
            tokio::spawn(async move { manager.open_stream(ticks("R_50")).await })
        };
        wait_for_sends(&fx.transport, 1).await;
        let req_id = fx.transport.sent.lock()[0].req_id().unwrap();

        let mut response = Envelope::new();
        response.set_req_id(req_id);
        response.insert("msg_type", Value::from("tick"));
        response.insert("tick", serde_json::json!({ "quote": 1.0 }));
        response.insert("subscription", serde_json::json!({ "id": "sub-early" }));

        // The inbound path sees the response before the completion slot
        // resolves; the stream must be routable right away.
        fx.manager.note_response(req_id, &response);
        assert!(fx.manager.knows_subscription("sub-early"));
        assert!(fx.manager.handle_push("sub-early", &push_for("sub-early", 2.5)));

        let _ = fx.correlator.resolve(req_id, response);
        let handle = opener.await.unwrap().unwrap().stream().unwrap();
        assert_eq!(handle.state(), StreamState::Active);
        assert_eq!(handle.subscription_id().as_deref(), Some("sub-early"));

        // The cache kept the later push, not the first response.
        let entry = fx.cache.lookup(&handle.info().fingerprint).unwrap();
        let quote = entry
            .value
            .get("tick")
            .and_then(|t| t.get("quote"))
            .and_then(Value::as_f64);
        assert_eq!(quote, Some(2.5));
    }

    #[tokio::test]
    async fn note_response_ignores_unknown_tokens() {
        let fx = fixture();

        let response = push_for("sub-x", 1.0);
        fx.manager.note_response(777, &response);

        assert!(!fx.manager.knows_subscription("sub-x"));
        assert_eq!(fx.manager.stream_count(), 0);
    }
}
