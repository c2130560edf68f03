//! Per-Endpoint Call Wrappers
//!
//! Thin parameter-shaping conveniences over [`DerivClient::send`] and
//! [`DerivClient::subscribe`]. They only build request envelopes; all
//! correlation, caching, and stream mechanics live in the facade.

use serde_json::Value;

use crate::application::services::client::DerivClient;
use crate::application::services::correlator::CallError;
use crate::application::services::subscriptions::SubscribeOutcome;
use crate::domain::envelope::Envelope;

fn request(method: &str, value: Value) -> Envelope {
    let mut envelope = Envelope::new();
    envelope.insert(method, value);
    envelope
}

impl DerivClient {
    /// Ping the server.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from dispatch.
    pub async fn ping(&self) -> Result<Envelope, CallError> {
        self.send(request("ping", Value::from(1))).await
    }

    /// Request the server epoch time.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from dispatch.
    pub async fn time(&self) -> Result<Envelope, CallError> {
        self.send(request("time", Value::from(1))).await
    }

    /// Authorize the session with an API token.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from dispatch. A rejected token arrives as
    /// an error-shaped response, not as an `Err`.
    pub async fn authorize(&self, token: &str) -> Result<Envelope, CallError> {
        self.send(request("authorize", Value::from(token))).await
    }

    /// Request the account balance.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from dispatch.
    pub async fn balance(&self) -> Result<Envelope, CallError> {
        self.send(request("balance", Value::from(1))).await
    }

    /// Request the list of active symbols (cache-eligible by default).
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from dispatch.
    pub async fn active_symbols(&self, detail: &str) -> Result<Envelope, CallError> {
        self.send(request("active_symbols", Value::from(detail)))
            .await
    }

    /// Subscribe to tick updates for a symbol.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from the subscribe dispatch.
    pub async fn ticks(&self, symbol: &str) -> Result<SubscribeOutcome, CallError> {
        self.subscribe(request("ticks", Value::from(symbol))).await
    }

    /// Forget a subscription by its raw id.
    ///
    /// Prefer [`DerivClient::unsubscribe`] for streams this client manages;
    /// this wrapper exists for ids obtained out of band.
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from dispatch.
    pub async fn forget(&self, subscription_id: &str) -> Result<Envelope, CallError> {
        self.send(request("forget", Value::from(subscription_id)))
            .await
    }

    /// Forget every remote subscription of a given stream type.
    ///
    /// Note this only tells the server; locally managed streams should be
    /// cancelled through [`DerivClient::unsubscribe_all`].
    ///
    /// # Errors
    ///
    /// Propagates [`CallError`] from dispatch.
    pub async fn forget_all(&self, stream_type: &str) -> Result<Envelope, CallError> {
        self.send(request("forget_all", Value::from(stream_type)))
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================
