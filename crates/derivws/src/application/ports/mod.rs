//! Port Interfaces
//!
//! Contracts between the runtime core and external systems, following the
//! Hexagonal Architecture pattern. The core consumes a transport collaborator
//! through [`transport::Transport`] and reacts to its lifecycle events; it
//! never implements connection or reconnection policy itself.

/// Transport collaborator contract.
pub mod transport;

pub use transport::{Transport, TransportError, TransportEvent};
