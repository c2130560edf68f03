#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access
    )
)]

//! derivws - Multiplexing WebSocket Client
//!
//! A client runtime that multiplexes many concurrent logical requests and
//! long-lived subscriptions over a single WebSocket connection to the Deriv
//! trading API, deduplicating identical live queries and caching reusable
//! responses so repeated calls generate no redundant network traffic.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Envelopes, fingerprints, stream state, cache
//!   - `envelope`: wire unit and tagged inbound classification
//!   - `fingerprint`: canonical request keys for caching and sharing
//!   - `stream`: stream state machine and listener registry
//!   - `cache`: fingerprint-keyed response store
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: transport collaborator contract
//!   - `services`: correlator, subscription manager, client facade
//!   - `events`: diagnostic event channel
//!   - `endpoints`: thin per-endpoint wrappers
//!
//! - **Infrastructure**: Adapters
//!   - `websocket`: tokio-tungstenite transport
//!   - `config`: environment-driven settings
//!
//! # Data Flow
//!
//! ```text
//!              send()                   subscribe()
//!                |                          |
//!                v                          v
//!          +-----------+            +---------------+
//!          |   Cache   |--miss----->|  Subscription |
//!          |   Store   |            |    Manager    |
//!          +-----------+            +-------+-------+
//!                |                          |
//!                +------> Correlator <------+
//!                             |
//!                             v
//!                     Transport (one WebSocket)
//! ```
//!
//! Inbound envelopes take the reverse path through a single router task:
//! classified once, routed correlation-id-first, pushes fanned out to every
//! listener of their stream.

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no IO.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheEntry, CacheKind, CacheStore, InMemoryCache};
pub use domain::envelope::{ApiError, Envelope, EnvelopeError, Inbound};
pub use domain::fingerprint::Fingerprint;
pub use domain::stream::{
    ListenerId, PushListener, StreamHandle, StreamId, StreamInfo, StreamState,
};

// Ports
pub use application::ports::{Transport, TransportError, TransportEvent};

// Services
pub use application::events::{ClientEvent, EventBus};
pub use application::services::client::{ClientConfig, DerivClient};
pub use application::services::correlator::{CallError, Correlator};
pub use application::services::subscriptions::{SubscribeOutcome, SubscriptionManager};

// Infrastructure
pub use infrastructure::config::{ClientSettings, ConfigError};
pub use infrastructure::websocket::WebSocketTransport;
