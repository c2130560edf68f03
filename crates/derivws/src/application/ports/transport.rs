//! Transport Port
//!
//! The runtime core drives a single duplex connection through this port:
//! outbound text goes through [`Transport::send`], inbound text and
//! lifecycle changes arrive as [`TransportEvent`]s on an mpsc channel handed
//! to the client at construction.
//!
//! Reconnection and retry timing are the adapter's responsibility; the core
//! only reacts to `Opened`/`Closed` by resetting its own tables.

use async_trait::async_trait;

/// Errors surfaced by a transport adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Sending an outbound message failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The transport has already been closed.
    #[error("transport closed")]
    Closed,
}

/// Lifecycle and message events delivered by a transport adapter.
///
/// Events for one connection are delivered in order on a single channel;
/// the core processes them one at a time.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection is open and ready.
    Opened,
    /// One raw inbound message.
    Message(String),
    /// The connection closed; every outstanding call must be swept.
    Closed {
        /// Close reason reported by the peer or the adapter, if any.
        reason: Option<String>,
    },
}

/// Outbound half of a duplex connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one raw outbound message.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] surfaced to the immediate caller only.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the close handshake fails.
    async fn close(&self) -> Result<(), TransportError>;
}
