//! Response Cache
//!
//! A pluggable key-value store mapping request fingerprints to the most
//! recent matching response. The store itself is policy-agnostic: which
//! request kinds are cacheable is decided at the facade, and the only
//! eviction is explicit invalidation plus stream-lifecycle-driven removal.
//!
//! # Entry Kinds
//!
//! - `OneShot`: a cached call response, reused verbatim for an identical
//!   fingerprint until explicitly invalidated.
//! - `StreamLatest`: the latest push of a live subscription, overwritten on
//!   every push and removed when its stream completes or is cancelled.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::envelope::Envelope;
use super::fingerprint::Fingerprint;

/// Kind of cached value; drives the entry's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Response to a one-shot call.
    OneShot,
    /// Latest push of a live subscription.
    StreamLatest,
}

/// One cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Latest envelope payload for the fingerprint.
    pub value: Envelope,
    /// Lifecycle kind of this entry.
    pub kind: CacheKind,
    /// When the entry was (last) written.
    pub stored_at: DateTime<Utc>,
}

/// Pluggable fingerprint-keyed response store.
pub trait CacheStore: Send + Sync {
    /// Look up the entry for a fingerprint.
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry>;

    /// Store or overwrite the entry for a fingerprint.
    fn store(&self, fingerprint: Fingerprint, value: Envelope, kind: CacheKind);

    /// Remove the entry for a fingerprint, if present.
    fn invalidate(&self, fingerprint: &Fingerprint);

    /// Remove every entry.
    fn invalidate_all(&self);

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries of a given kind.
    fn count_of_kind(&self, kind: CacheKind) -> usize;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Default in-memory cache store.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
}

impl InMemoryCache {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for InMemoryCache {
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.entries.read().get(fingerprint).cloned()
    }

    fn store(&self, fingerprint: Fingerprint, value: Envelope, kind: CacheKind) {
        let entry = CacheEntry {
            value,
            kind,
            stored_at: Utc::now(),
        };
        self.entries.write().insert(fingerprint, entry);
    }

    fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.write().remove(fingerprint);
    }

    fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn count_of_kind(&self, kind: CacheKind) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.kind == kind)
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(json: &str) -> Fingerprint {
        Fingerprint::of(&Envelope::from_json(json).unwrap())
    }

    fn env(json: &str) -> Envelope {
        Envelope::from_json(json).unwrap()
    }

    #[test]
    fn lookup_miss_then_hit() {
        let cache = InMemoryCache::new();
        let key = fp(r#"{"active_symbols":"brief"}"#);

        assert!(cache.lookup(&key).is_none());

        cache.store(key.clone(), env(r#"{"msg_type":"active_symbols"}"#), CacheKind::OneShot);
        let entry = cache.lookup(&key).unwrap();
        assert_eq!(entry.kind, CacheKind::OneShot);
        assert_eq!(entry.value.msg_type(), Some("active_symbols"));
    }

    #[test]
    fn store_overwrites_latest_value() {
        let cache = InMemoryCache::new();
        let key = fp(r#"{"ticks":"R_50","subscribe":1}"#);

        cache.store(
            key.clone(),
            env(r#"{"msg_type":"tick","tick":{"quote":1.0}}"#),
            CacheKind::StreamLatest,
        );
        cache.store(
            key.clone(),
            env(r#"{"msg_type":"tick","tick":{"quote":2.0}}"#),
            CacheKind::StreamLatest,
        );

        assert_eq!(cache.len(), 1);
        let entry = cache.lookup(&key).unwrap();
        assert_eq!(
            entry.value.get("tick").and_then(|t| t.get("quote")),
            Some(&serde_json::Value::from(2.0))
        );
    }

    #[test]
    fn directed_invalidation() {
        let cache = InMemoryCache::new();
        let a = fp(r#"{"active_symbols":"brief"}"#);
        let b = fp(r#"{"asset_index":1}"#);

        cache.store(a.clone(), env(r#"{"msg_type":"active_symbols"}"#), CacheKind::OneShot);
        cache.store(b.clone(), env(r#"{"msg_type":"asset_index"}"#), CacheKind::OneShot);

        cache.invalidate(&a);
        assert!(cache.lookup(&a).is_none());
        assert!(cache.lookup(&b).is_some());

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn counts_by_kind() {
        let cache = InMemoryCache::new();
        cache.store(fp(r#"{"ping":1}"#), env(r#"{"msg_type":"ping"}"#), CacheKind::OneShot);
        cache.store(
            fp(r#"{"ticks":"R_50","subscribe":1}"#),
            env(r#"{"msg_type":"tick"}"#),
            CacheKind::StreamLatest,
        );

        assert_eq!(cache.count_of_kind(CacheKind::OneShot), 1);
        assert_eq!(cache.count_of_kind(CacheKind::StreamLatest), 1);
        assert_eq!(cache.len(), 2);
    }
}
