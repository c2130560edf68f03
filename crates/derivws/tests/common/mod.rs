//! Shared test harness: a scriptable in-memory transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use derivws::{
    ClientConfig, DerivClient, Envelope, Transport, TransportError, TransportEvent,
};

/// Maps each outbound request to the envelopes the "server" sends back.
pub type Responder = Box<dyn Fn(&Envelope) -> Vec<Envelope> + Send + Sync>;

/// In-memory transport driven by a responder script.
///
/// Outbound envelopes are recorded and answered inline; tests inject
/// unsolicited pushes and close events directly.
pub struct FakeTransport {
    sent: Mutex<Vec<Envelope>>,
    responder: Responder,
    inbound: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn start(responder: Responder) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (inbound, rx) = mpsc::channel(64);
        let transport = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            responder,
            inbound,
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }

    /// Every envelope sent so far, in order.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Deliver an unsolicited envelope, as the server would push it.
    pub async fn inject(&self, envelope: Envelope) {
        self.inbound
            .send(TransportEvent::Message(envelope.to_json()))
            .await
            .expect("router gone");
    }

    /// Report the connection as lost.
    pub async fn inject_close(&self, reason: Option<String>) {
        self.inbound
            .send(TransportEvent::Closed { reason })
            .await
            .expect("router gone");
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        let request =
            Envelope::from_json(&text).map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.sent.lock().push(request.clone());

        for reply in (self.responder)(&request) {
            self.inbound
                .send(TransportEvent::Message(reply.to_json()))
                .await
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a client over a fake transport with the default configuration.
pub fn client_with(responder: Responder) -> (Arc<FakeTransport>, DerivClient) {
    client_with_config(responder, ClientConfig::default())
}

pub fn client_with_config(
    responder: Responder,
    config: ClientConfig,
) -> (Arc<FakeTransport>, DerivClient) {
    let (transport, rx) = FakeTransport::start(responder);
    let client = DerivClient::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        rx,
        config,
    );
    (transport, client)
}

/// Build a reply echoing the request's correlation token.
pub fn reply_to(request: &Envelope, mut body: Envelope) -> Envelope {
    if let Some(req_id) = request.req_id() {
        body.set_req_id(req_id);
    }
    body
}

pub fn envelope(value: Value) -> Envelope {
    Envelope::from_value(value).expect("object literal")
}

/// Responder script for the tick subscription flow: subscribe-shaped
/// requests are granted a per-symbol subscription id, `forget` requests are
/// confirmed, everything else is echoed with `msg_type: "ok"`.
pub fn venue_responder() -> Responder {
    Box::new(|request| {
        let body = if request.is_subscribe_request() {
            let symbol = request
                .get("ticks")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            envelope(serde_json::json!({
                "msg_type": "tick",
                "tick": { "quote": 0.0 },
                "subscription": { "id": format!("sub-{symbol}") },
            }))
        } else if request.get("forget").is_some() {
            envelope(serde_json::json!({ "msg_type": "forget", "forget": 1 }))
        } else {
            envelope(serde_json::json!({ "msg_type": "ok" }))
        };
        vec![reply_to(request, body)]
    })
}

/// A tick push for a live subscription.
pub fn tick_push(subscription_id: &str, quote: f64) -> Envelope {
    envelope(serde_json::json!({
        "msg_type": "tick",
        "subscription": { "id": subscription_id },
        "tick": { "quote": quote },
    }))
}

/// Poll `condition` until it holds or two seconds elapse.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within deadline"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
