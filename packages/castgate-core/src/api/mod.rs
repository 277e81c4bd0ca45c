//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to the session machine. Provides router
//! construction and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{CastError, CastResult};
use crate::events::NotificationHub;
use crate::protocol_constants::API_PORT_RANGE;
use crate::session::SessionMachine;
use crate::state::Config;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::{WsClientInfo, WsConnectionManager};

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// The session state machine.
    pub machine: Arc<SessionMachine>,
    /// Notification fan-out; WebSocket clients subscribe here.
    pub hub: NotificationHub,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    machine: Option<Arc<SessionMachine>>,
    hub: Option<NotificationHub>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    config: Option<Arc<RwLock<Config>>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn machine(mut self, machine: Arc<SessionMachine>) -> Self {
        self.machine = Some(machine);
        self
    }

    pub fn hub(mut self, hub: NotificationHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Sets the WebSocket connection manager. Defaults to a fresh one.
    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    /// Sets the configuration. Defaults to [`Config::default`].
    pub fn config(mut self, config: Arc<RwLock<Config>>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`.
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Configuration`] if the machine or hub is missing.
    pub fn build(self) -> CastResult<AppState> {
        Ok(AppState {
            machine: self
                .machine
                .ok_or_else(|| CastError::Configuration("machine is required".into()))?,
            hub: self
                .hub
                .ok_or_else(|| CastError::Configuration("hub is required".into()))?,
            ws_manager: self.ws_manager.unwrap_or_default(),
            config: self
                .config
                .unwrap_or_else(|| Arc::new(RwLock::new(Config::default()))),
        })
    }
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

async fn find_available_port(start: u16, end: u16) -> Result<(u16, TcpListener), ServerError> {
    for port in start..=end {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the API listener.
///
/// A non-zero `preferred_port` is bound directly; zero scans the default
/// API port range.
pub async fn bind_listener(preferred_port: u16) -> Result<(u16, TcpListener), ServerError> {
    if preferred_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], preferred_port));
        Ok((preferred_port, TcpListener::bind(&addr).await?))
    } else {
        let (start, end) = API_PORT_RANGE;
        find_available_port(start, end).await
    }
}

/// Serves the API on an already-bound listener until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let ws_manager = Arc::clone(&state.ws_manager);
    let app = http::create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // Open sockets would otherwise hold graceful shutdown forever.
            ws_manager.close_all();
        })
        .await?;
    Ok(())
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let preferred_port = state.config.read().preferred_port;
    let (port, listener) = bind_listener(preferred_port).await?;

    log::info!("Server listening on http://0.0.0.0:{}", port);
    serve(listener, state, shutdown).await
}
