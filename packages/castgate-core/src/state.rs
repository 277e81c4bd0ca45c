//! Core configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    CONNECTION_ACCEPT_TIMEOUT_MS, DEFAULT_API_PORT, EVENT_CHANNEL_CAPACITY,
    FRIENDLY_NAME_RETRY_INTERVAL_MS, RADIO_CONNECT_TIMEOUT_MS,
};
use crate::session::SessionConfig;

/// Configuration for the castgate core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS API (0 = auto-allocate).
    pub preferred_port: u16,

    // Session
    /// How long a connection request waits for accept/reject (milliseconds).
    pub connection_accept_timeout_ms: u64,

    /// How long a WiFi connection attempt may suppress discovery (milliseconds).
    pub radio_connect_timeout_ms: u64,

    /// Interval between friendly-name lookups until one succeeds (milliseconds).
    pub friendly_name_retry_interval_ms: u64,

    /// Accept connections and launches without asking a client.
    pub auto_accept: bool,

    /// Enable the service as soon as it starts.
    pub enable_on_start: bool,

    // Events
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: DEFAULT_API_PORT,
            connection_accept_timeout_ms: CONNECTION_ACCEPT_TIMEOUT_MS,
            radio_connect_timeout_ms: RADIO_CONNECT_TIMEOUT_MS,
            friendly_name_retry_interval_ms: FRIENDLY_NAME_RETRY_INTERVAL_MS,
            auto_accept: false,
            enable_on_start: true,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.connection_accept_timeout_ms == 0 {
            return Err("connection_accept_timeout_ms must be >= 1".to_string());
        }
        if self.radio_connect_timeout_ms == 0 {
            return Err("radio_connect_timeout_ms must be >= 1".to_string());
        }
        if self.friendly_name_retry_interval_ms == 0 {
            return Err(
                "friendly_name_retry_interval_ms must be >= 1 (interval panics on 0)".to_string(),
            );
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }

    /// Timing and policy for the session machine.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connection_accept_timeout: Duration::from_millis(self.connection_accept_timeout_ms),
            radio_connect_timeout: Duration::from_millis(self.radio_connect_timeout_ms),
            friendly_name_retry_interval: Duration::from_millis(
                self.friendly_name_retry_interval_ms,
            ),
            auto_accept: self.auto_accept,
            enable_on_start: self.enable_on_start,
        }
    }
}
