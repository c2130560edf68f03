//! Configuration
//!
//! Environment-driven connection settings.

/// Settings types and env loading.
pub mod settings;

pub use settings::{ClientSettings, ConfigError};
