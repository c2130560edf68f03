//! Request Fingerprinting
//!
//! A fingerprint is the canonical form of a request's semantic content, used
//! as the key for response caching and subscription sharing. Two
//! structurally equal requests always collide to the same fingerprint.
//!
//! # Canonicalization Contract
//!
//! - Top-level `req_id` and `passthrough` fields are removed: they carry
//!   transport concerns, not request semantics.
//! - The `subscribe` flag is kept: a subscribe-shaped request and its
//!   one-shot twin are distinct keys.
//! - The remainder is serialized as compact JSON with lexicographically
//!   sorted keys at every nesting level, so field insertion order never
//!   affects the key.

use serde_json::Value;

use super::envelope::Envelope;

/// Canonical hash of a request's semantic fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a request envelope.
    #[must_use]
    pub fn of(request: &Envelope) -> Self {
        let mut semantic = request.fields().clone();
        semantic.remove("req_id");
        semantic.remove("passthrough");
        Self(Value::Object(semantic).to_string())
    }

    /// The canonical form backing this fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
