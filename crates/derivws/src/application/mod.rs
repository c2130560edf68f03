//! Application Layer
//!
//! Use cases and port definitions: the transport contract the core
//! consumes, the services that implement correlation and subscription
//! mechanics, the diagnostic event channel, and the thin per-endpoint
//! wrappers exposed on the facade.

/// Port interfaces for external systems.
pub mod ports;

/// Correlator, subscription manager, and client facade.
pub mod services;

/// Diagnostic event channel.
pub mod events;

/// Thin per-endpoint call wrappers.
pub mod endpoints;
