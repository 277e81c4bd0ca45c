//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! event loop, notification hub, collaborator bridges and session machine are
//! instantiated and wired together.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, WsConnectionManager};
use crate::controller::{
    BroadcastDiscoveryController, BroadcastPlayerBridge, DiscoveryController, FriendlyNameSource,
    PlayerBridge,
};
use crate::error::{CastError, CastResult};
use crate::events::{EventEmitter, FanoutEmitter, LoggingEventEmitter, NotificationHub};
use crate::protocol_constants::WATCHDOG_LOOP_THREAD_NAME;
use crate::runtime::{EventLoop, TokioSpawner};
use crate::session::{SessionDeps, SessionMachine};
use crate::state::Config;
use crate::watchdog::Scheduler;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// The session state machine.
    pub machine: Arc<SessionMachine>,
    /// Notification fan-out and broadcast channel.
    pub hub: NotificationHub,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Shared configuration, also exposed to the API.
    pub config: Arc<RwLock<Config>>,
    /// Dedicated thread that runs watchdog timers.
    pub event_loop: Arc<EventLoop>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Builds the API state from the wired services.
    pub fn app_state(&self) -> AppState {
        AppState {
            machine: Arc::clone(&self.machine),
            hub: self.hub.clone(),
            ws_manager: Arc::clone(&self.ws_manager),
            config: Arc::clone(&self.config),
        }
    }

    /// Starts the session machine: friendly-name lookup and, if configured,
    /// enabling the service.
    pub fn start_background_tasks(&self) {
        log::info!("[Bootstrap] Starting session machine");
        self.machine.start();
    }

    /// Initiates graceful shutdown of all services.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.cancel_token.cancel();

        let connections_closed = self.ws_manager.close_all();
        if connections_closed > 0 {
            log::info!(
                "[Bootstrap] Closed {} WebSocket connection(s)",
                connections_closed
            );
        }

        self.machine.shutdown();
        self.event_loop.shutdown();

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Watchdog event loop (dedicated thread)
/// 2. Notification hub (dispatcher spawned on `handle`)
/// 3. Collaborator bridges publishing on the hub
/// 4. Session machine
///
/// `friendly_name` of `None` disables friendly-name propagation.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the event loop thread
/// fails to start.
pub fn bootstrap_services(
    config: &Config,
    handle: Handle,
    friendly_name: Option<Arc<dyn FriendlyNameSource>>,
) -> CastResult<BootstrappedServices> {
    config.validate().map_err(CastError::Configuration)?;

    let event_loop = Arc::new(EventLoop::new(WATCHDOG_LOOP_THREAD_NAME).map_err(|e| {
        CastError::Runtime(format!("Failed to start watchdog event loop: {}", e))
    })?);

    let spawner = TokioSpawner::new(handle);
    let hub = NotificationHub::new(config.event_channel_capacity, &spawner);

    let discovery: Arc<dyn DiscoveryController> =
        Arc::new(BroadcastDiscoveryController::new(hub.clone()));
    let player: Arc<dyn PlayerBridge> = Arc::new(BroadcastPlayerBridge::new(hub.clone()));
    let emitter: Arc<dyn EventEmitter> = Arc::new(FanoutEmitter::new(vec![
        Arc::new(hub.clone()),
        Arc::new(LoggingEventEmitter),
    ]));

    let machine = SessionMachine::new(
        config.session_config(),
        SessionDeps {
            discovery,
            player,
            emitter,
            friendly_name,
        },
        Scheduler::new(event_loop.handle().clone()),
    );

    Ok(BootstrappedServices {
        machine,
        hub,
        ws_manager: Arc::new(WsConnectionManager::new()),
        config: Arc::new(RwLock::new(config.clone())),
        event_loop,
        spawner,
        cancel_token: CancellationToken::new(),
    })
}
