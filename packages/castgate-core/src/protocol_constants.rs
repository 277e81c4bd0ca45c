//! Fixed timing and protocol constants.
//!
//! Defaults for tunable values live in [`Config`](crate::state::Config); the
//! values here are shared between the core and the daemon and should only
//! change together with the collaborating discovery/player processes.

// ─────────────────────────────────────────────────────────────────────────────
// Watchdogs
// ─────────────────────────────────────────────────────────────────────────────

/// Window for the user (or remote UI) to accept or reject a connection request
/// before the session is recycled (milliseconds).
pub const CONNECTION_ACCEPT_TIMEOUT_MS: u64 = 40_000;

/// Window for a WiFi "connecting" state to resolve before casting discovery is
/// resumed anyway (milliseconds).
pub const RADIO_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Interval between attempts to resolve the device's friendly name (milliseconds).
pub const FRIENDLY_NAME_RETRY_INTERVAL_MS: u64 = 5_000;

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the broadcast channel carrying notifications and commands.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP API
// ─────────────────────────────────────────────────────────────────────────────

/// Default port for the control API.
pub const DEFAULT_API_PORT: u16 = 49500;

/// Port range scanned when the preferred port is 0 (auto-allocate).
pub const API_PORT_RANGE: (u16, u16) = (49500, 49510);

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "castgate";

/// Thread name of the dedicated watchdog event loop.
pub const WATCHDOG_LOOP_THREAD_NAME: &str = "castgate-watchdog";
