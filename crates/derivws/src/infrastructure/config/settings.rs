//! Connection Settings
//!
//! Connection-level configuration for the WebSocket transport, loaded from
//! environment variables. Behavioral knobs (cacheable methods, listener
//! policy) live on [`crate::ClientConfig`] instead.

use std::time::Duration;

/// Settings for one WebSocket connection to the venue.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// WebSocket endpoint, without query parameters.
    pub endpoint: String,
    /// Application identifier the venue assigned to this client.
    pub app_id: String,
    /// Response language code.
    pub language: String,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// Capacity of the inbound transport event channel.
    pub event_capacity: usize,
}

impl ClientSettings {
    /// Default production endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "wss://ws.derivws.com/websockets/v3";

    /// Create settings for an app id with defaults for everything else.
    #[must_use]
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            app_id: app_id.into(),
            language: "en".to_string(),
            ping_interval: Duration::from_secs(30),
            event_capacity: 1_024,
        }
    }

    /// Load settings from environment variables.
    ///
    /// `DERIV_APP_ID` is required; `DERIV_ENDPOINT`, `DERIV_LANGUAGE`,
    /// `DERIVWS_PING_INTERVAL_SECS`, and `DERIVWS_EVENT_CAPACITY` override
    /// defaults. A `.env` file is honored when present.
    ///
    /// # Errors
    ///
    /// Returns an error if `DERIV_APP_ID` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let app_id = std::env::var("DERIV_APP_ID")
            .map_err(|_| ConfigError::MissingEnvVar("DERIV_APP_ID".to_string()))?;
        if app_id.is_empty() {
            return Err(ConfigError::EmptyValue("DERIV_APP_ID".to_string()));
        }

        let mut settings = Self::new(app_id);

        if let Ok(endpoint) = std::env::var("DERIV_ENDPOINT")
            && !endpoint.is_empty()
        {
            settings.endpoint = endpoint;
        }
        if let Ok(language) = std::env::var("DERIV_LANGUAGE")
            && !language.is_empty()
        {
            settings.language = language;
        }
        settings.ping_interval = parse_env_duration_secs(
            "DERIVWS_PING_INTERVAL_SECS",
            settings.ping_interval,
        );
        settings.event_capacity =
            parse_env_usize("DERIVWS_EVENT_CAPACITY", settings.event_capacity);

        Ok(settings)
    }

    /// The full connection URL with query parameters.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}?app_id={}&l={}",
            self.endpoint, self.app_id, self.language
        )
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Tests
// =============================================================================
