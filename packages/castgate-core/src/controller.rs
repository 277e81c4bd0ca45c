//! Trait abstractions for the collaborators the session machine commands.
//!
//! The machine depends on these traits rather than on concrete processes.
//! Every method is fire-and-forget: it must return promptly and must not
//! block on the collaborator's completion. Implementations may call back into
//! the machine synchronously; the session lock is re-entrant for that reason.

use crate::events::{DiscoveryCommand, NotificationHub, PlayerCommand};
use crate::session::{ConnectionDecision, LaunchContext};

/// Peer discovery and connection negotiation.
pub trait DiscoveryController: Send + Sync {
    /// (Re)starts advertising as a cast target.
    fn restart_discovery(&self);

    /// Stops advertising.
    fn stop_discovery(&self);

    /// Forwards the accept/reject decision for the pending request.
    fn accept_client_connection(&self, decision: ConnectionDecision);

    /// Tears the session down and restarts discovery for `mac`.
    fn restart_session_discovery(&self, mac: &str);

    /// Points the pending launch at the given source.
    fn switch_launch_request_context(&self, launch: &LaunchContext);

    /// Drops the current session without restarting discovery.
    fn flush_current_session(&self);

    fn set_p2p_backend_discovery(&self, enabled: bool);

    /// Sets the name advertised to peers.
    fn set_friendly_name(&self, name: &str);
}

/// Playback engine control. Only used when launches are accepted automatically.
pub trait PlayerBridge: Send + Sync {
    /// Starts rendering the stream described by `launch`.
    fn begin_playback(&self, launch: &LaunchContext);
}

/// Provides the device's display name once it is known.
pub trait FriendlyNameSource: Send + Sync {
    /// Returns `None` while the name is not available yet.
    fn friendly_name(&self) -> Option<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast Bridges
// ─────────────────────────────────────────────────────────────────────────────

/// Publishes discovery commands on the hub's broadcast channel.
///
/// An external discovery process consumes them over the WebSocket.
#[derive(Clone)]
pub struct BroadcastDiscoveryController {
    hub: NotificationHub,
}

impl BroadcastDiscoveryController {
    pub fn new(hub: NotificationHub) -> Self {
        Self { hub }
    }

    fn send(&self, command: DiscoveryCommand) {
        log::debug!("[Discovery] -> {:?}", command);
        self.hub.publish(command);
    }
}

impl DiscoveryController for BroadcastDiscoveryController {
    fn restart_discovery(&self) {
        self.send(DiscoveryCommand::RestartDiscovery);
    }

    fn stop_discovery(&self) {
        self.send(DiscoveryCommand::StopDiscovery);
    }

    fn accept_client_connection(&self, decision: ConnectionDecision) {
        self.send(DiscoveryCommand::AcceptClientConnection { decision });
    }

    fn restart_session_discovery(&self, mac: &str) {
        self.send(DiscoveryCommand::RestartSessionDiscovery {
            mac: mac.to_string(),
        });
    }

    fn switch_launch_request_context(&self, launch: &LaunchContext) {
        self.send(DiscoveryCommand::SwitchLaunchRequestContext {
            launch: launch.clone(),
        });
    }

    fn flush_current_session(&self) {
        self.send(DiscoveryCommand::FlushCurrentSession);
    }

    fn set_p2p_backend_discovery(&self, enabled: bool) {
        self.send(DiscoveryCommand::SetP2pBackendDiscovery { enabled });
    }

    fn set_friendly_name(&self, name: &str) {
        self.send(DiscoveryCommand::SetFriendlyName {
            friendly_name: name.to_string(),
        });
    }
}

/// Publishes player commands on the hub's broadcast channel.
#[derive(Clone)]
pub struct BroadcastPlayerBridge {
    hub: NotificationHub,
}

impl BroadcastPlayerBridge {
    pub fn new(hub: NotificationHub) -> Self {
        Self { hub }
    }
}

impl PlayerBridge for BroadcastPlayerBridge {
    fn begin_playback(&self, launch: &LaunchContext) {
        log::debug!("[Player] -> begin playback from {}", launch.source_ip);
        self.hub.publish(PlayerCommand::BeginPlayback {
            launch: launch.clone(),
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Friendly Name Sources
// ─────────────────────────────────────────────────────────────────────────────

/// A name fixed by configuration.
pub struct StaticFriendlyName(String);

impl StaticFriendlyName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl FriendlyNameSource for StaticFriendlyName {
    fn friendly_name(&self) -> Option<String> {
        Some(self.0.clone()).filter(|name| !name.trim().is_empty())
    }
}

/// Uses the machine's hostname.
pub struct HostnameFriendlyName;

impl FriendlyNameSource for HostnameFriendlyName {
    fn friendly_name(&self) -> Option<String> {
        match hostname::get() {
            Ok(name) => name
                .into_string()
                .ok()
                .filter(|name| !name.trim().is_empty()),
            Err(e) => {
                log::debug!("[Session] Hostname not available yet: {}", e);
                None
            }
        }
    }
}
