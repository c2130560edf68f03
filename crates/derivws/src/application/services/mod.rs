//! Application Services
//!
//! - `correlator`: pending-call table matching responses to requests
//! - `subscriptions`: stream lifecycle, sharing, and push fan-out
//! - `client`: the facade composing both around one transport

/// Request/response correlation.
pub mod correlator;

/// Stream lifecycle and fan-out.
pub mod subscriptions;

/// Client facade and inbound router.
pub mod client;
