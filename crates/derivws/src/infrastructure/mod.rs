//! Infrastructure Layer
//!
//! Adapters for external systems: the tokio-tungstenite transport and
//! environment-driven configuration.

/// Connection settings.
pub mod config;

/// WebSocket transport adapter.
pub mod websocket;
