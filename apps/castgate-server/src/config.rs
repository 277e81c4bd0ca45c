//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use castgate_core::protocol_constants::{
    CONNECTION_ACCEPT_TIMEOUT_MS, DEFAULT_API_PORT, FRIENDLY_NAME_RETRY_INTERVAL_MS,
    RADIO_CONNECT_TIMEOUT_MS,
};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WS API to (0 = first free port in the default range).
    /// Override: `CASTGATE_BIND_PORT`
    pub bind_port: u16,

    /// Accept connections and launches without waiting for a client decision.
    /// Override: `CASTGATE_AUTO_ACCEPT`
    pub auto_accept: bool,

    /// Enable discovery as soon as the daemon starts.
    pub enable_on_start: bool,

    /// Name advertised to peers. Falls back to the hostname.
    /// Override: `CASTGATE_FRIENDLY_NAME`
    pub friendly_name: Option<String>,

    /// Milliseconds a connection request waits for accept/reject.
    /// Override: `CASTGATE_CONNECTION_ACCEPT_TIMEOUT_MS`
    pub connection_accept_timeout_ms: u64,

    /// Milliseconds a WiFi connection attempt may suppress discovery.
    pub radio_connect_timeout_ms: u64,

    /// Milliseconds between friendly-name lookups.
    pub friendly_name_retry_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: DEFAULT_API_PORT,
            auto_accept: false,
            enable_on_start: true,
            friendly_name: None,
            connection_accept_timeout_ms: CONNECTION_ACCEPT_TIMEOUT_MS,
            radio_connect_timeout_ms: RADIO_CONNECT_TIMEOUT_MS,
            friendly_name_retry_interval_ms: FRIENDLY_NAME_RETRY_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("CASTGATE_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(auto) = var("CASTGATE_AUTO_ACCEPT").and_then(|v| parse_flag(&v)) {
            self.auto_accept = auto;
        }

        if let Some(name) = var("CASTGATE_FRIENDLY_NAME").filter(|v| !v.trim().is_empty()) {
            self.friendly_name = Some(name);
        }

        if let Some(ms) =
            var("CASTGATE_CONNECTION_ACCEPT_TIMEOUT_MS").and_then(|v| v.parse().ok())
        {
            self.connection_accept_timeout_ms = ms;
        }
    }

    /// Converts to castgate-core's Config type.
    pub fn to_core_config(&self) -> castgate_core::Config {
        castgate_core::Config {
            preferred_port: self.bind_port,
            connection_accept_timeout_ms: self.connection_accept_timeout_ms,
            radio_connect_timeout_ms: self.radio_connect_timeout_ms,
            friendly_name_retry_interval_ms: self.friendly_name_retry_interval_ms,
            auto_accept: self.auto_accept,
            enable_on_start: self.enable_on_start,
            ..Default::default()
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
