//! Castgate Core - session lifecycle for a wireless screen-mirroring sink.
//!
//! This crate owns the single cast session of a display device: it decides
//! when the device is discoverable, negotiates connection and launch requests
//! with peers, recycles sessions that time out or fail, and couples discovery
//! to the device's power and WiFi state. It is used by the headless
//! `castgate-server` daemon.
//!
//! # Architecture
//!
//! - [`session`]: The session state machine and its domain types
//! - [`watchdog`]: Cancellable one-shot and periodic timers on an event loop
//! - [`power`] / [`radio`]: Power-mode and WiFi trackers gating discovery
//! - [`events`]: Notification hub and event types for real-time clients
//! - [`controller`]: Seams to the discovery controller and player
//! - [`api`]: HTTP/WebSocket surface
//! - [`bootstrap`]: Composition root
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting session events
//! - [`DiscoveryController`](controller::DiscoveryController): Peer discovery
//!   and negotiation
//! - [`PlayerBridge`](controller::PlayerBridge): Playback engine
//! - [`FriendlyNameSource`](controller::FriendlyNameSource): Device name lookup
//!
//! The broadcast implementations publish commands over the WebSocket so the
//! discovery and player processes can live outside the daemon.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod controller;
pub mod error;
pub mod events;
pub mod power;
pub mod protocol_constants;
pub mod radio;
pub mod runtime;
pub mod session;
pub mod state;
pub mod utils;
pub mod watchdog;

// Re-export commonly used types at the crate root
pub use controller::{
    BroadcastDiscoveryController, BroadcastPlayerBridge, DiscoveryController, FriendlyNameSource,
    HostnameFriendlyName, PlayerBridge, StaticFriendlyName,
};
pub use error::{CastError, CastResult, ErrorCode};
pub use events::{
    BroadcastEvent, DiscoveryCommand, EventEmitter, NotificationHub, PlayerCommand,
    SessionNotification, StateEvent,
};
pub use power::{PowerState, PowerStateTracker};
pub use radio::{RadioStateTracker, WifiState};
pub use runtime::{EventLoop, TaskSpawner, TokioSpawner};
pub use session::{
    Ack, ConnectionDecision, LaunchContext, PlayerState, SessionError, SessionEvent,
    SessionMachine, SessionSnapshot, SessionState, StopReason,
};
pub use state::Config;
pub use utils::now_millis;
pub use watchdog::{Scheduler, WatchdogKind, Watchdogs};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{
    bind_listener, serve, start_server, AppState, AppStateBuilder, ServerError,
    WsConnectionManager,
};
