//! Wire Envelope Types
//!
//! The venue exchanges JSON objects ("envelopes") over a single WebSocket.
//! An envelope is a flat mapping of field names to JSON values, optionally
//! carrying a correlation token and/or a subscription identifier.
//!
//! # Wire Format
//!
//! - `req_id` (integer): correlation token stamped by the client and echoed
//!   verbatim by the server on the matching response.
//! - `subscription` (object): `{"id": "<token>"}`, assigned by the server on
//!   the first response to a subscribe-capable request and present on every
//!   subsequent push for that stream.
//! - `msg_type` (string): response/push discriminator. `"stream_end"` marks
//!   natural end-of-stream for the named subscription.
//! - `error` (object): `{"code": "...", "message": "..."}` inside an
//!   otherwise well-formed response. An application-level error, not a
//!   routing failure.
//! - `subscribe: 1` marks subscribe-shaped requests; `passthrough` is an
//!   opaque client echo field.
//!
//! Inbound routing never inspects payload semantics: every received envelope
//! is classified exactly once into [`Inbound`] before any component logic
//! runs, correlation-id-first, then subscription-id.

use serde_json::{Map, Value};

/// Top-level request fields that carry transport/runtime concerns rather
/// than request semantics. Excluded from fingerprints and from method
/// detection.
pub const RESERVED_FIELDS: &[&str] = &["passthrough", "req_id", "subscribe"];

// =============================================================================
// Error Type
// =============================================================================

/// Errors produced while decoding an envelope from the wire.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload was valid JSON but not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// The payload was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Envelope
// =============================================================================

/// One message unit exchanged over the connection.
///
/// Immutable once received; the runtime only mutates envelopes it is about
/// to send (to stamp the correlation token).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Create an empty envelope.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build an envelope from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::NotAnObject`] if the value is not an object.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(EnvelopeError::NotAnObject),
        }
    }

    /// Parse an envelope from wire text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Serialize to wire text.
    #[must_use]
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Get a field by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Borrow the underlying field map.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The correlation token, if present.
    #[must_use]
    pub fn req_id(&self) -> Option<u64> {
        self.0.get("req_id").and_then(Value::as_u64)
    }

    /// Stamp the correlation token.
    pub fn set_req_id(&mut self, req_id: u64) {
        self.0.insert("req_id".to_string(), Value::from(req_id));
    }

    /// The subscription identifier (`subscription.id`), if present.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.0
            .get("subscription")
            .and_then(|s| s.get("id"))
            .and_then(Value::as_str)
    }

    /// The `msg_type` discriminator, if present.
    #[must_use]
    pub fn msg_type(&self) -> Option<&str> {
        self.0.get("msg_type").and_then(Value::as_str)
    }

    /// Whether this envelope marks natural end-of-stream.
    #[must_use]
    pub fn is_stream_end(&self) -> bool {
        self.msg_type() == Some("stream_end")
    }

    /// Whether this request asks the server to open a push stream.
    #[must_use]
    pub fn is_subscribe_request(&self) -> bool {
        self.0.get("subscribe").and_then(Value::as_u64) == Some(1)
    }

    /// Mark this request as subscribe-shaped.
    pub fn set_subscribe(&mut self) {
        self.0.insert("subscribe".to_string(), Value::from(1));
    }

    /// The application-level error carried by this envelope, if any.
    ///
    /// An error-shaped field is a *successful* correlation match whose
    /// result is an error value; the runtime passes it through untouched.
    #[must_use]
    pub fn error(&self) -> Option<ApiError> {
        let err = self.0.get("error")?;
        Some(ApiError {
            code: err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// The request's distinguished method field.
    ///
    /// For responses this is `msg_type`; for requests it is the first
    /// non-reserved field name (field order is canonical because the
    /// underlying map is sorted by key).
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        if let Some(msg_type) = self.msg_type() {
            return Some(msg_type);
        }
        self.0
            .keys()
            .map(String::as_str)
            .find(|key| !RESERVED_FIELDS.contains(key))
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Application-level error payload inside a well-formed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Venue error code (e.g. `"InvalidToken"`).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// =============================================================================
// Inbound Classification
// =============================================================================

/// A received envelope, classified exactly once at the inbound boundary.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Echoes a correlation token; completes a pending call.
    CorrelatedResponse {
        /// Echoed correlation token.
        req_id: u64,
        /// The full envelope.
        envelope: Envelope,
    },
    /// A push for a live subscription.
    SubscriptionPush {
        /// Subscription identifier the push belongs to.
        subscription_id: String,
        /// The full envelope.
        envelope: Envelope,
    },
    /// Natural end-of-stream for a subscription.
    StreamEnd {
        /// Subscription identifier the marker closes.
        subscription_id: String,
        /// The full envelope.
        envelope: Envelope,
    },
    /// Carries neither a known correlation token nor a subscription id.
    Unroutable {
        /// The full envelope.
        envelope: Envelope,
    },
}

impl Inbound {
    /// Classify a received envelope, correlation-id-first.
    #[must_use]
    pub fn classify(envelope: Envelope) -> Self {
        if let Some(req_id) = envelope.req_id() {
            return Self::CorrelatedResponse { req_id, envelope };
        }

        if let Some(id) = envelope.subscription_id() {
            let subscription_id = id.to_string();
            if envelope.is_stream_end() {
                return Self::StreamEnd {
                    subscription_id,
                    envelope,
                };
            }
            return Self::SubscriptionPush {
                subscription_id,
                envelope,
            };
        }

        Self::Unroutable { envelope }
    }
}

// =============================================================================
// Tests
// =============================================================================
