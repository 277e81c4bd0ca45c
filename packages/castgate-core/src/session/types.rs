//! Session data model: states, peer identity, player reports and inbound events.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::power::PowerState;
use crate::radio::WifiState;
use crate::watchdog::WatchdogKind;

// ─────────────────────────────────────────────────────────────────────────────
// Session State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of the cast session. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Discovery is not running.
    #[default]
    Idle,
    /// Advertising as a cast target, no peer engaged.
    Discoverable,
    /// A peer asked to connect; waiting for accept/reject.
    Connecting,
    /// A peer launched directly without a prior connection request.
    DirectLaunchRequested,
    /// Direct launch is waiting for accept/reject.
    DirectLaunchConnecting,
    ConnectionAccepted,
    ConnectionRejected,
    /// Discovery is being restarted after the session ended.
    RestartingSession,
    /// A stop request is tearing down an accepted connection.
    AbortingConnection,
    /// The peer's stream is being rendered.
    PlayerLaunched,
}

impl SessionState {
    /// States in which a [`PendingPeer`] must be cached.
    #[must_use]
    pub fn holds_pending_peer(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::DirectLaunchRequested
                | SessionState::DirectLaunchConnecting
        )
    }

    /// States in which no peer is engaged with the receiver.
    #[must_use]
    pub fn is_unengaged(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Discoverable)
    }

    /// States that end once the discovery controller reports a restart.
    #[must_use]
    pub fn awaits_discovery_restart(&self) -> bool {
        matches!(
            self,
            SessionState::RestartingSession
                | SessionState::ConnectionRejected
                | SessionState::AbortingConnection
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Peer Identity
// ─────────────────────────────────────────────────────────────────────────────

/// MAC address and display name of a source device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub mac: String,
    pub name: String,
}

impl PeerIdentity {
    pub fn new(mac: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            name: name.into(),
        }
    }

    /// MACs compare case-insensitively, names exactly.
    #[must_use]
    pub fn matches(&self, mac: &str, name: &str) -> bool {
        self.mac.eq_ignore_ascii_case(mac) && self.name == name
    }
}

/// Everything the player needs to open a stream from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchContext {
    pub source_ip: IpAddr,
    pub source_mac: String,
    pub source_name: String,
    pub sink_ip: IpAddr,
}

/// Identity of the device currently negotiating or launching.
///
/// The addresses are known only when the peer arrived through a launch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPeer {
    pub mac: String,
    pub name: String,
    pub source_ip: Option<IpAddr>,
    pub sink_ip: Option<IpAddr>,
}

impl PendingPeer {
    pub fn from_connection(mac: &str, name: &str) -> Self {
        Self {
            mac: mac.to_string(),
            name: name.to_string(),
            source_ip: None,
            sink_ip: None,
        }
    }

    pub fn from_launch(launch: &LaunchContext) -> Self {
        Self {
            mac: launch.source_mac.clone(),
            name: launch.source_name.clone(),
            source_ip: Some(launch.source_ip),
            sink_ip: Some(launch.sink_ip),
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(&self.mac, &self.name)
    }

    /// Returns the launch context if both addresses are known.
    pub fn launch_context(&self) -> Option<LaunchContext> {
        Some(LaunchContext {
            source_ip: self.source_ip?,
            source_mac: self.mac.clone(),
            source_name: self.name.clone(),
            sink_ip: self.sink_ip?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Player State
// ─────────────────────────────────────────────────────────────────────────────

/// Playback engine state mirrored from the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerState {
    #[default]
    Idle,
    Initiated,
    InProgress,
    Playing,
    Stopped,
}

impl FromStr for PlayerState {
    type Err = String;

    /// Accepts `Playing`, `playing`, `IN_PROGRESS`, `in-progress`, `inProgress`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "idle" => Ok(PlayerState::Idle),
            "initiated" => Ok(PlayerState::Initiated),
            "inprogress" => Ok(PlayerState::InProgress),
            "playing" => Ok(PlayerState::Playing),
            "stopped" => Ok(PlayerState::Stopped),
            _ => Err(s.to_string()),
        }
    }
}

/// Why the player stopped. Carried on the wire as a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Success,
    AppRequested,
    PeerRequested,
    /// A new connection is taking over the receiver.
    NewConnection,
    InternalFailure,
    Timeout,
    Unknown(u32),
}

impl StopReason {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => StopReason::Success,
            1 => StopReason::AppRequested,
            2 => StopReason::PeerRequested,
            3 => StopReason::NewConnection,
            4 => StopReason::InternalFailure,
            5 => StopReason::Timeout,
            other => StopReason::Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            StopReason::Success => 0,
            StopReason::AppRequested => 1,
            StopReason::PeerRequested => 2,
            StopReason::NewConnection => 3,
            StopReason::InternalFailure => 4,
            StopReason::Timeout => 5,
            StopReason::Unknown(code) => *code,
        }
    }

    /// Reasons that should be reported to listeners as a connection error.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::InternalFailure | StopReason::Timeout | StopReason::Unknown(_)
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary Types
// ─────────────────────────────────────────────────────────────────────────────

/// Accept/reject decision for a pending connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionDecision {
    Accept,
    Reject,
}

impl FromStr for ConnectionDecision {
    type Err = String;

    /// Only the exact strings `Accept` and `Reject` are valid.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Accept" => Ok(ConnectionDecision::Accept),
            "Reject" => Ok(ConnectionDecision::Reject),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ConnectionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a boundary operation that did not fail.
///
/// `success == false` marks a benign no-op (stale request); idempotent repeats
/// are `success == true` with an informational message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn done() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn done_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Callbacks from the discovery controller, power manager and radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    ConnectionRequest { mac: String, name: String },
    #[serde(rename_all = "camelCase")]
    LaunchRequest {
        #[serde(flatten)]
        launch: LaunchContext,
        /// Whether a connection request for this peer was already reported.
        #[serde(default)]
        connection_reported: bool,
    },
    DiscoveryRestarted,
    PowerModeChanged { old: PowerState, new: PowerState },
    NetworkStandbyChanged { enabled: bool },
    WifiStateChanged { state: WifiState },
}

/// Point-in-time view of the whole session record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub pending_peer: Option<PendingPeer>,
    pub active_peer: Option<PeerIdentity>,
    pub preempting_peer: Option<PeerIdentity>,
    pub player_state: PlayerState,
    pub service_enabled: bool,
    pub discovery_active: bool,
    pub power_state: PowerState,
    pub was_active_before_sleep: bool,
    pub wifi_state: WifiState,
    pub radio_connecting: bool,
    pub armed_watchdogs: Vec<WatchdogKind>,
    pub friendly_name: Option<String>,
}
