//! Event system for notifications and real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait through which the session machine publishes
//! - [`NotificationHub`] which fans notifications out to listeners and to the
//!   WebSocket broadcast channel
//! - Event types for notifications, state changes and collaborator commands

mod emitter;
mod hub;

pub use emitter::{EventEmitter, FanoutEmitter, LoggingEventEmitter, NoopEventEmitter};
pub use hub::{ListenerId, NotificationHub, NotificationListener};

use std::net::IpAddr;

use serde::Serialize;

use crate::session::{ConnectionDecision, LaunchContext, PlayerState, SessionState};

/// Events broadcast to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Public session notifications (connection request, error, launch).
    Notification(SessionNotification),

    /// Session state transitions.
    State(StateEvent),

    /// Commands for the discovery/negotiation process.
    Discovery(DiscoveryCommand),

    /// Commands for the playback process.
    Player(PlayerCommand),
}

/// Notifications delivered asynchronously to registered listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionNotification {
    /// A peer asks to connect and waits for an accept/reject decision.
    #[serde(rename_all = "camelCase")]
    ClientConnectionRequest {
        mac: String,
        name: String,
        timestamp: u64,
    },
    /// A connection attempt or session ended abnormally.
    #[serde(rename_all = "camelCase")]
    ClientConnectionError {
        mac: String,
        name: String,
        reason_code: u32,
        timestamp: u64,
    },
    /// An accepted peer wants the receiver to start playback.
    #[serde(rename_all = "camelCase")]
    LaunchRequest {
        source_ip: IpAddr,
        source_mac: String,
        source_name: String,
        sink_ip: IpAddr,
        timestamp: u64,
    },
}

/// Session state change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StateEvent {
    #[serde(rename_all = "camelCase")]
    Changed {
        from: SessionState,
        to: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    PlayerStateChanged {
        mac: String,
        player_state: PlayerState,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    EnabledChanged { enabled: bool, timestamp: u64 },
}

/// Commands published for an out-of-process discovery controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryCommand {
    RestartDiscovery,
    StopDiscovery,
    AcceptClientConnection { decision: ConnectionDecision },
    RestartSessionDiscovery { mac: String },
    SwitchLaunchRequestContext { launch: LaunchContext },
    FlushCurrentSession,
    #[serde(rename = "setP2pBackendDiscovery")]
    SetP2pBackendDiscovery { enabled: bool },
    #[serde(rename_all = "camelCase")]
    SetFriendlyName { friendly_name: String },
}

/// Commands published for an out-of-process player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerCommand {
    BeginPlayback { launch: LaunchContext },
}

impl From<SessionNotification> for BroadcastEvent {
    fn from(event: SessionNotification) -> Self {
        BroadcastEvent::Notification(event)
    }
}

impl From<StateEvent> for BroadcastEvent {
    fn from(event: StateEvent) -> Self {
        BroadcastEvent::State(event)
    }
}

impl From<DiscoveryCommand> for BroadcastEvent {
    fn from(event: DiscoveryCommand) -> Self {
        BroadcastEvent::Discovery(event)
    }
}

impl From<PlayerCommand> for BroadcastEvent {
    fn from(event: PlayerCommand) -> Self {
        BroadcastEvent::Player(event)
    }
}
