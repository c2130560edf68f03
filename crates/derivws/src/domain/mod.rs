//! Domain Layer
//!
//! Core types with no IO: wire envelopes and their inbound classification,
//! request fingerprints, stream state and listener bookkeeping, and the
//! response cache.

/// Wire envelope and tagged inbound classification.
pub mod envelope;

/// Canonical request fingerprints for caching and subscription sharing.
pub mod fingerprint;

/// Stream state machine and listener registry.
pub mod stream;

/// Fingerprint-keyed response cache.
pub mod cache;
