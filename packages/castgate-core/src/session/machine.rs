//! The session lifecycle state machine.
//!
//! # Locking
//!
//! Every entry point takes the re-entrant session lock first and holds it for
//! the whole operation. Collaborator commands are issued while the lock is
//! held, so they are serialized with each other, and a collaborator that
//! calls back synchronously re-enters on the same thread. `RefCell` borrows
//! of the record are confined to [`SessionMachine::with_record`] and never
//! span a call out.
//!
//! Watchdog callbacks run on the event loop. They take the session lock,
//! [`claim`](crate::watchdog::Watchdogs::claim) their timer id and re-check
//! the state before acting.

use std::cell::RefCell;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::ReentrantMutex;

use super::gate::DiscoveryGate;
use super::types::{
    Ack, ConnectionDecision, LaunchContext, PeerIdentity, PendingPeer, PlayerState,
    SessionEvent, SessionSnapshot, SessionState, StopReason,
};
use super::{SessionError, SessionResult};
use crate::controller::{DiscoveryController, FriendlyNameSource, PlayerBridge};
use crate::events::{EventEmitter, SessionNotification, StateEvent};
use crate::power::{PowerAction, PowerState, PowerStateTracker};
use crate::protocol_constants::{
    CONNECTION_ACCEPT_TIMEOUT_MS, FRIENDLY_NAME_RETRY_INTERVAL_MS, RADIO_CONNECT_TIMEOUT_MS,
};
use crate::radio::{RadioAction, RadioStateTracker, WifiState};
use crate::utils::{new_session_id, now_millis};
use crate::watchdog::{Scheduler, TimerId, WatchdogKind, Watchdogs};

/// Timing and policy knobs for the machine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a connection request may wait for accept/reject.
    pub connection_accept_timeout: Duration,
    /// How long discovery stays suppressed by a WiFi connection attempt.
    pub radio_connect_timeout: Duration,
    pub friendly_name_retry_interval: Duration,
    /// Accept connections and launches without asking a listener.
    pub auto_accept: bool,
    /// Enable the service as part of [`SessionMachine::start`].
    pub enable_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_accept_timeout: Duration::from_millis(CONNECTION_ACCEPT_TIMEOUT_MS),
            radio_connect_timeout: Duration::from_millis(RADIO_CONNECT_TIMEOUT_MS),
            friendly_name_retry_interval: Duration::from_millis(FRIENDLY_NAME_RETRY_INTERVAL_MS),
            auto_accept: false,
            enable_on_start: false,
        }
    }
}

/// Collaborators the machine commands and publishes to.
pub struct SessionDeps {
    pub discovery: Arc<dyn DiscoveryController>,
    pub player: Arc<dyn PlayerBridge>,
    pub emitter: Arc<dyn EventEmitter>,
    /// `None` disables friendly-name propagation.
    pub friendly_name: Option<Arc<dyn FriendlyNameSource>>,
}

#[derive(Debug, Default)]
struct SessionRecord {
    state: SessionState,
    session_id: Option<String>,
    pending: Option<PendingPeer>,
    /// Peer whose connection was accepted or is playing.
    active_peer: Option<PeerIdentity>,
    /// Peer that asked to connect while another one was playing.
    preempting: Option<PeerIdentity>,
    player_state: PlayerState,
    friendly_name: Option<String>,
}

impl SessionRecord {
    /// A stop report from `mac` belongs to a session that has been replaced.
    fn is_superseded_by_other(&self, mac: &str) -> bool {
        let differs = |other: &str| !other.eq_ignore_ascii_case(mac);
        self.pending.as_ref().is_some_and(|p| differs(&p.mac))
            || self.preempting.as_ref().is_some_and(|p| differs(&p.mac))
    }

    fn name_for(&self, mac: &str) -> String {
        let candidates = [
            self.active_peer.as_ref().map(|p| (&p.mac, &p.name)),
            self.preempting.as_ref().map(|p| (&p.mac, &p.name)),
            self.pending.as_ref().map(|p| (&p.mac, &p.name)),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|(m, _)| m.eq_ignore_ascii_case(mac))
            .map(|(_, name)| name.clone())
            .unwrap_or_default()
    }
}

/// Owns the single cast session and enforces its lifecycle.
pub struct SessionMachine {
    config: SessionConfig,
    session: ReentrantMutex<RefCell<SessionRecord>>,
    gate: DiscoveryGate,
    power: PowerStateTracker,
    radio: RadioStateTracker,
    watchdogs: Watchdogs,
    discovery: Arc<dyn DiscoveryController>,
    player: Arc<dyn PlayerBridge>,
    emitter: Arc<dyn EventEmitter>,
    friendly_name: Option<Arc<dyn FriendlyNameSource>>,
    self_ref: Weak<SessionMachine>,
}

impl SessionMachine {
    /// Creates the machine. Watchdog callbacks run on `scheduler`'s runtime.
    pub fn new(config: SessionConfig, deps: SessionDeps, scheduler: Scheduler) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            session: ReentrantMutex::new(RefCell::new(SessionRecord::default())),
            gate: DiscoveryGate::default(),
            power: PowerStateTracker::new(),
            radio: RadioStateTracker::new(),
            watchdogs: Watchdogs::new(scheduler),
            discovery: deps.discovery,
            player: deps.player,
            emitter: deps.emitter,
            friendly_name: deps.friendly_name,
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolves the friendly name (retrying periodically until known) and
    /// enables the service if configured to.
    pub fn start(&self) {
        let _guard = self.session.lock();

        if !self.refresh_friendly_name() {
            log::info!(
                "[Session] Friendly name not available, retrying every {:?}",
                self.config.friendly_name_retry_interval
            );
            self.arm_friendly_name_retry();
        }

        if self.config.enable_on_start {
            match self.set_enabled(true) {
                Ok(ack) => log::info!("[Session] Enabled on start ({:?})", ack.message),
                Err(e) => log::warn!("[Session] Failed to enable on start: {}", e),
            }
        }
    }

    /// Cancels every timer, stops discovery and resets all fields to defaults.
    pub fn shutdown(&self) {
        let _guard = self.session.lock();

        self.watchdogs.cancel_all();
        if self.gate.deactivate() {
            self.discovery.stop_discovery();
        }
        self.gate.reset();
        self.power.reset();
        self.radio.reset();
        self.with_record(|record| *record = SessionRecord::default());

        log::info!("[Session] Deinitialized");
    }

    /// Routes a collaborator callback to its handler.
    pub fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::ConnectionRequest { mac, name } => {
                self.on_connection_request(&mac, &name)
            }
            SessionEvent::LaunchRequest {
                launch,
                connection_reported,
            } => self.on_launch_request(launch, connection_reported),
            SessionEvent::DiscoveryRestarted => self.on_discovery_restarted(),
            SessionEvent::PowerModeChanged { old, new } => self.on_power_mode_changed(old, new),
            SessionEvent::NetworkStandbyChanged { enabled } => {
                self.on_network_standby_changed(enabled)
            }
            SessionEvent::WifiStateChanged { state } => self.on_wifi_state_changed(state),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Boundary Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// Sets the operator's intent to allow discovery.
    ///
    /// # Errors
    ///
    /// Disabling is refused while the player is running.
    pub fn set_enabled(&self, enabled: bool) -> SessionResult<Ack> {
        let _guard = self.session.lock();

        if enabled {
            if !self.gate.set_enabled(true) {
                return Ok(Ack::done_with("Service already enabled"));
            }
            log::info!("[Session] Service enabled");
            self.emit_enabled(true);

            if self.power.take_resume_flag() {
                self.defer_resume();
            } else if self.power.defer_until_wake() {
                log::info!("[Session] Device asleep, discovery starts on wake");
            } else {
                self.resume_discovery();
            }
            return Ok(Ack::done());
        }

        if !self.gate.is_enabled() {
            return Ok(Ack::done_with("Service already disabled"));
        }

        let state = self.state();
        if state == SessionState::PlayerLaunched {
            return Err(SessionError::PolicyViolation(
                "Cannot disable the service while the player is running".to_string(),
            ));
        }

        self.gate.set_enabled(false);
        log::info!("[Session] Service disabled");
        if state == SessionState::RestartingSession {
            log::info!("[Session] Stopping discovery while a session restart is in flight");
        }

        self.suspend_discovery();
        self.watchdogs.cancel(WatchdogKind::ConnectionAccept);
        self.watchdogs.cancel(WatchdogKind::RadioConnect);
        self.transition(SessionState::Idle);
        self.emit_enabled(false);

        Ok(Ack::done())
    }

    /// Applies an accept/reject decision to the pending connection request.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidDecision`] for anything but `"Accept"`
    /// or `"Reject"`; nothing is changed in that case.
    pub fn accept_client_connection(&self, decision: &str) -> SessionResult<Ack> {
        let decision: ConnectionDecision =
            decision.parse().map_err(SessionError::InvalidDecision)?;

        let _guard = self.session.lock();
        Ok(self.apply_decision(decision))
    }

    /// Tears down an accepted connection before launch.
    ///
    /// # Errors
    ///
    /// Refused after launch; the identity must match the accepted or the
    /// preempting peer.
    pub fn stop_client_connection(&self, mac: &str, name: &str) -> SessionResult<Ack> {
        let _guard = self.session.lock();

        let (state, active, preempting) = self.with_record(|r| {
            (r.state, r.active_peer.clone(), r.preempting.clone())
        });

        match state {
            SessionState::PlayerLaunched => Err(SessionError::PolicyViolation(
                "Cannot stop the connection after the player has launched".to_string(),
            )),
            SessionState::ConnectionAccepted => {
                let known = [active.as_ref(), preempting.as_ref()]
                    .into_iter()
                    .flatten()
                    .any(|peer| peer.matches(mac, name));
                if !known {
                    return Err(SessionError::IdentityMismatch {
                        mac: mac.to_string(),
                        name: name.to_string(),
                    });
                }

                let restart_mac = preempting.map_or_else(|| mac.to_string(), |peer| peer.mac);
                log::info!("[Session] Stopping connection with {} ({})", name, mac);

                self.transition(SessionState::AbortingConnection);
                self.restart_session(&restart_mac);
                Ok(Ack::done())
            }
            other => {
                log::info!("[Session] Stop request already received (state: {})", other);
                Ok(Ack::stale(format!(
                    "Stop request already received (state: {other})"
                )))
            }
        }
    }

    /// Mirrors a player state report and reacts to the player stopping.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPlayerState`] for unknown states.
    pub fn update_player_state(
        &self,
        mac: &str,
        player_state: &str,
        reason_code: u32,
    ) -> SessionResult<Ack> {
        let player_state: PlayerState = player_state
            .parse()
            .map_err(SessionError::InvalidPlayerState)?;

        let _guard = self.session.lock();

        if player_state != PlayerState::Stopped {
            self.set_player_state(mac, player_state);
            return Ok(Ack::done());
        }

        let reason = StopReason::from_code(reason_code);
        if reason == StopReason::NewConnection {
            log::info!("[Session] Player for {} stopped for a new connection, flushing", mac);
            self.set_player_state(mac, player_state);
            self.discovery.flush_current_session();
            return Ok(Ack::done());
        }

        let (state, superseded, name) = self.with_record(|r| {
            (r.state, r.is_superseded_by_other(mac), r.name_for(mac))
        });

        if superseded {
            log::info!("[Session] Ignoring stop from superseded session {}", mac);
            return Ok(Ack::stale("Stop report belongs to a superseded session"));
        }
        self.set_player_state(mac, player_state);

        if state.is_unengaged() || state == SessionState::RestartingSession {
            log::debug!("[Session] Player stopped with no session to end ({})", state);
            return Ok(Ack::done_with("No session to end"));
        }

        log::info!("[Session] Player for {} stopped ({:?})", mac, reason);
        if reason.is_failure() {
            self.emitter
                .emit_notification(SessionNotification::ClientConnectionError {
                    mac: mac.to_string(),
                    name,
                    reason_code: reason.code(),
                    timestamp: now_millis(),
                });
        }

        self.watchdogs.cancel(WatchdogKind::ConnectionAccept);
        if self.gate.is_enabled() {
            self.restart_session(mac);
        } else {
            self.transition(SessionState::Idle);
        }
        Ok(Ack::done())
    }

    /// Pass-through to the discovery controller.
    pub fn set_p2p_backend_discovery(&self, enabled: bool) -> Ack {
        let _guard = self.session.lock();
        log::info!("[Session] P2P backend discovery: {}", enabled);
        self.discovery.set_p2p_backend_discovery(enabled);
        Ack::done()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Collaborator Callbacks
    // ─────────────────────────────────────────────────────────────────────────

    /// A peer asks to connect.
    pub fn on_connection_request(&self, mac: &str, name: &str) {
        let _guard = self.session.lock();

        if !self.gate.is_enabled() {
            log::warn!(
                "[Session] Connection request from {} ({}) while disabled, rejecting",
                name,
                mac
            );
            self.discovery
                .accept_client_connection(ConnectionDecision::Reject);
            return;
        }

        let (from, cached) = self.with_record(|r| (r.state, r.pending.clone()));
        let identity = PeerIdentity::new(mac, name);

        if from == SessionState::PlayerLaunched {
            log::info!(
                "[Session] Preempting connection request from {} ({}) while playing",
                name,
                mac
            );
            self.with_record(|r| r.preempting = Some(identity.clone()));
        }

        let (next, pending) = if from == SessionState::DirectLaunchRequested {
            let pending = cached
                .filter(|p| p.mac.eq_ignore_ascii_case(mac))
                .unwrap_or_else(|| PendingPeer::from_connection(mac, name));
            (SessionState::DirectLaunchConnecting, pending)
        } else {
            (SessionState::Connecting, PendingPeer::from_connection(mac, name))
        };
        self.transition_pending(next, pending);

        if self.config.auto_accept {
            let superseded = self.with_record(|r| {
                if r.preempting.is_some() {
                    r.preempting = None;
                    r.active_peer.take()
                } else {
                    None
                }
            });
            if let Some(old) = superseded {
                log::info!("[Session] Ending session with {} for {}", old.mac, mac);
                self.emitter
                    .emit_notification(SessionNotification::ClientConnectionError {
                        mac: old.mac,
                        name: old.name,
                        reason_code: StopReason::NewConnection.code(),
                        timestamp: now_millis(),
                    });
                self.discovery.flush_current_session();
            }
            self.apply_decision(ConnectionDecision::Accept);
            return;
        }

        self.arm_connection_accept();
        self.emitter
            .emit_notification(SessionNotification::ClientConnectionRequest {
                mac: mac.to_string(),
                name: name.to_string(),
                timestamp: now_millis(),
            });
    }

    /// A peer asks the receiver to launch playback.
    ///
    /// Without a prior connection request the launch is treated as a direct
    /// launch and goes through the connection request path first.
    pub fn on_launch_request(&self, launch: LaunchContext, connection_reported: bool) {
        let _guard = self.session.lock();
        let state = self.state();

        if !connection_reported {
            if !self.gate.is_enabled() {
                log::warn!(
                    "[Session] Direct launch from {} while disabled, rejecting",
                    launch.source_mac
                );
                self.discovery
                    .accept_client_connection(ConnectionDecision::Reject);
                return;
            }

            log::info!(
                "[Session] Direct launch request from {} ({})",
                launch.source_name,
                launch.source_mac
            );
            if state == SessionState::PlayerLaunched {
                let identity = PeerIdentity::new(&launch.source_mac, &launch.source_name);
                self.with_record(|r| r.preempting = Some(identity));
            }
            self.transition_pending(
                SessionState::DirectLaunchRequested,
                PendingPeer::from_launch(&launch),
            );
            self.on_connection_request(&launch.source_mac, &launch.source_name);
            return;
        }

        let known = self.with_record(|r| {
            [r.active_peer.as_ref(), r.preempting.as_ref()]
                .into_iter()
                .flatten()
                .any(|peer| peer.mac.eq_ignore_ascii_case(&launch.source_mac))
        });
        if state != SessionState::ConnectionAccepted || !known {
            log::info!(
                "[Session] Ignoring stale launch request from {} (state: {})",
                launch.source_mac,
                state
            );
            return;
        }

        self.with_record(|r| {
            r.active_peer = Some(PeerIdentity::new(&launch.source_mac, &launch.source_name));
            r.preempting = None;
        });
        self.transition(SessionState::PlayerLaunched);

        if self.config.auto_accept {
            self.player.begin_playback(&launch);
        } else {
            self.emitter
                .emit_notification(SessionNotification::LaunchRequest {
                    source_ip: launch.source_ip,
                    source_mac: launch.source_mac,
                    source_name: launch.source_name,
                    sink_ip: launch.sink_ip,
                    timestamp: now_millis(),
                });
        }
    }

    /// The discovery controller finished restarting discovery.
    pub fn on_discovery_restarted(&self) {
        let _guard = self.session.lock();
        let state = self.state();

        if !state.awaits_discovery_restart() {
            log::debug!("[Session] Discovery restarted in state {}, nothing to do", state);
            return;
        }

        if self.gate.is_active() {
            self.transition(SessionState::Discoverable);
        } else {
            self.transition(SessionState::Idle);
        }
    }

    pub fn on_wifi_state_changed(&self, state: WifiState) {
        let _guard = self.session.lock();

        match self.radio.on_state_changed(state) {
            RadioAction::Suppress => {
                log::info!("[Radio] WiFi connecting, suppressing discovery");
                self.suspend_discovery();
                self.arm_radio_connect();
            }
            RadioAction::Resume => {
                log::info!("[Radio] WiFi {:?}, resuming discovery", state);
                self.watchdogs.cancel(WatchdogKind::RadioConnect);
                self.resume_discovery();
            }
            RadioAction::Ignore => {}
        }
    }

    pub fn on_power_mode_changed(&self, old: PowerState, new: PowerState) {
        let _guard = self.session.lock();

        match self.power.on_mode_changed(old, new, self.gate.is_enabled()) {
            PowerAction::Resume => {
                log::info!("[Power] Awake, resuming discovery");
                self.defer_resume();
            }
            PowerAction::Suspend { stop_discovery } => {
                log::info!("[Power] Entering {:?}", new);
                self.watchdogs.cancel(WatchdogKind::ConnectionAccept);
                self.watchdogs.cancel(WatchdogKind::RadioConnect);
                if stop_discovery {
                    self.suspend_discovery();
                }
                let state = self.state();
                if !state.is_unengaged() && state != SessionState::PlayerLaunched {
                    self.transition(SessionState::Idle);
                }
            }
            PowerAction::Ignore => {}
        }
    }

    /// Takes effect at the next power-mode change.
    pub fn on_network_standby_changed(&self, enabled: bool) {
        let _guard = self.session.lock();
        log::info!("[Power] Network standby {}", if enabled { "on" } else { "off" });
        self.power.set_network_standby(enabled);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.with_record(|r| r.state)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let _guard = self.session.lock();
        let service_enabled = self.gate.is_enabled();
        let discovery_active = self.gate.is_active();
        let armed_watchdogs = self.watchdogs.armed_kinds();

        self.with_record(|r| SessionSnapshot {
            state: r.state,
            session_id: r.session_id.clone(),
            pending_peer: r.pending.clone(),
            active_peer: r.active_peer.clone(),
            preempting_peer: r.preempting.clone(),
            player_state: r.player_state,
            service_enabled,
            discovery_active,
            power_state: self.power.state(),
            was_active_before_sleep: self.power.was_active_before_sleep(),
            wifi_state: self.radio.state(),
            radio_connecting: self.radio.is_connecting(),
            armed_watchdogs,
            friendly_name: r.friendly_name.clone(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn with_record<R>(&self, f: impl FnOnce(&mut SessionRecord) -> R) -> R {
        let guard = self.session.lock();
        let mut record = guard.borrow_mut();
        f(&mut record)
    }

    /// The only place the state changes, apart from [`Self::transition_pending`].
    fn transition(&self, to: SessionState) {
        debug_assert!(!to.holds_pending_peer(), "{to} needs a pending peer");
        self.apply_transition(to, None);
    }

    fn transition_pending(&self, to: SessionState, pending: PendingPeer) {
        debug_assert!(to.holds_pending_peer(), "{to} cannot hold a pending peer");
        self.apply_transition(to, Some(pending));
    }

    fn apply_transition(&self, to: SessionState, pending: Option<PendingPeer>) {
        let (from, session_id) = self.with_record(|r| {
            let from = r.state;
            r.state = to;
            r.pending = pending;

            // A direct launch keeps the id it got on arrival
            if to.holds_pending_peer() && from != SessionState::DirectLaunchRequested {
                r.session_id = Some(new_session_id());
            }
            if matches!(
                to,
                SessionState::Idle
                    | SessionState::Discoverable
                    | SessionState::RestartingSession
                    | SessionState::ConnectionRejected
            ) {
                r.active_peer = None;
                r.preempting = None;
            }
            if to.is_unengaged() {
                r.session_id = None;
            }
            (from, r.session_id.clone())
        });

        if from == to && !to.holds_pending_peer() {
            return;
        }

        log::info!(
            "[Session] {} -> {} (session: {})",
            from,
            to,
            session_id.as_deref().unwrap_or("-")
        );
        self.emitter.emit_state(StateEvent::Changed {
            from,
            to,
            session_id,
            timestamp: now_millis(),
        });
    }

    fn set_player_state(&self, mac: &str, player_state: PlayerState) {
        let previous = self.with_record(|r| std::mem::replace(&mut r.player_state, player_state));
        if previous != player_state {
            log::debug!("[Session] Player {:?} -> {:?}", previous, player_state);
        }
        self.emitter.emit_state(StateEvent::PlayerStateChanged {
            mac: mac.to_string(),
            player_state,
            timestamp: now_millis(),
        });
    }

    fn emit_enabled(&self, enabled: bool) {
        self.emitter.emit_state(StateEvent::EnabledChanged {
            enabled,
            timestamp: now_millis(),
        });
    }

    fn apply_decision(&self, decision: ConnectionDecision) -> Ack {
        self.watchdogs.cancel(WatchdogKind::ConnectionAccept);
        let (state, pending) = self.with_record(|r| (r.state, r.pending.clone()));

        // State changes before commands: the controller may call back synchronously.
        match (state, decision) {
            (SessionState::DirectLaunchConnecting, ConnectionDecision::Accept) => {
                self.adopt_accepted_peer(pending.as_ref());
                self.transition(SessionState::ConnectionAccepted);
                match pending.as_ref().and_then(PendingPeer::launch_context) {
                    Some(launch) => self.discovery.switch_launch_request_context(&launch),
                    None => log::warn!("[Session] Direct launch accepted without addresses"),
                }
            }
            (SessionState::DirectLaunchConnecting, ConnectionDecision::Reject) => {
                self.transition(SessionState::ConnectionRejected);
                self.with_record(|r| r.player_state = PlayerState::Idle);
                match pending {
                    Some(peer) => self.restart_session(&peer.mac),
                    None => self.transition(SessionState::RestartingSession),
                }
            }
            (SessionState::Connecting, ConnectionDecision::Accept) => {
                self.adopt_accepted_peer(pending.as_ref());
                self.transition(SessionState::ConnectionAccepted);
                self.discovery.accept_client_connection(decision);
            }
            (SessionState::Connecting, ConnectionDecision::Reject) => {
                self.transition(SessionState::ConnectionRejected);
                self.discovery.accept_client_connection(decision);
            }
            (other, _) => {
                log::info!(
                    "[Session] Ignoring stale {} decision (state: {})",
                    decision,
                    other
                );
                return Ack::stale(format!("No connection request pending (state: {other})"));
            }
        }

        log::info!("[Session] Connection {}", decision);
        Ack::done()
    }

    /// While a preemption is pending the accepted peer stays the playing one.
    fn adopt_accepted_peer(&self, pending: Option<&PendingPeer>) {
        let Some(pending) = pending else { return };
        self.with_record(|r| {
            if r.preempting.is_none() || r.active_peer.is_none() {
                r.active_peer = Some(pending.identity());
            }
        });
    }

    /// Ends the current session and asks the controller to advertise again
    /// for `mac`.
    ///
    /// While power or radio state suppresses discovery the session goes to
    /// `Idle` instead; the wake or radio-resolve path restarts discovery.
    fn restart_session(&self, mac: &str) {
        if self.power.is_suspended() || self.radio.is_connecting() {
            log::info!(
                "[Session] Discovery suppressed, ending session with {} without restart",
                mac
            );
            self.transition(SessionState::Idle);
            return;
        }
        self.transition(SessionState::RestartingSession);
        self.discovery.restart_session_discovery(mac);
    }

    /// Starts discovery if the operator wants it and nothing suppresses it.
    fn resume_discovery(&self) {
        if self.radio.is_connecting() {
            if !self.watchdogs.is_armed(WatchdogKind::RadioConnect) {
                self.arm_radio_connect();
            }
            log::debug!("[Session] WiFi connecting, discovery stays suppressed");
            return;
        }

        let blocked = self.power.is_suspended();
        if !self.gate.try_activate(blocked) {
            return;
        }

        log::info!("[Session] Starting discovery");
        if self.state() == SessionState::Idle {
            self.transition(SessionState::Discoverable);
        }
        self.discovery.restart_discovery();
    }

    fn suspend_discovery(&self) {
        if !self.gate.deactivate() {
            return;
        }

        log::info!("[Session] Stopping discovery");
        if self.state() == SessionState::Discoverable {
            self.transition(SessionState::Idle);
        }
        self.discovery.stop_discovery();
    }

    /// Resumes discovery on the event loop, off the notifier's thread.
    fn defer_resume(&self) {
        let weak = self.self_ref.clone();
        self.watchdogs.scheduler().defer(move || {
            if let Some(machine) = weak.upgrade() {
                let _guard = machine.session.lock();
                machine.resume_discovery();
            }
        });
    }

    fn refresh_friendly_name(&self) -> bool {
        let Some(source) = &self.friendly_name else {
            return true;
        };
        let Some(name) = source.friendly_name() else {
            return false;
        };

        log::info!("[Session] Friendly name: {}", name);
        self.with_record(|r| r.friendly_name = Some(name.clone()));
        self.discovery.set_friendly_name(&name);
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Watchdogs
    // ─────────────────────────────────────────────────────────────────────────

    fn arm_connection_accept(&self) {
        let weak = self.self_ref.clone();
        self.watchdogs.arm(
            WatchdogKind::ConnectionAccept,
            self.config.connection_accept_timeout,
            move |id| {
                if let Some(machine) = weak.upgrade() {
                    machine.on_connection_accept_expired(id);
                }
            },
        );
    }

    fn on_connection_accept_expired(&self, id: TimerId) {
        let _guard = self.session.lock();
        if !self.watchdogs.claim(WatchdogKind::ConnectionAccept, id) {
            log::debug!("[Watchdog] Connection accept expiry superseded");
            return;
        }

        let (state, pending) = self.with_record(|r| (r.state, r.pending.clone()));
        if !matches!(
            state,
            SessionState::Connecting | SessionState::DirectLaunchConnecting
        ) {
            log::debug!("[Watchdog] Connection accept expired in {}, ignoring", state);
            return;
        }

        log::warn!(
            "[Watchdog] No decision within {:?}, restarting session",
            self.config.connection_accept_timeout
        );
        if let Some(peer) = &pending {
            self.emitter
                .emit_notification(SessionNotification::ClientConnectionError {
                    mac: peer.mac.clone(),
                    name: peer.name.clone(),
                    reason_code: StopReason::Timeout.code(),
                    timestamp: now_millis(),
                });
        }

        self.with_record(|r| r.player_state = PlayerState::Idle);
        match pending {
            Some(peer) => self.restart_session(&peer.mac),
            None => self.transition(SessionState::RestartingSession),
        }
    }

    fn arm_radio_connect(&self) {
        let weak = self.self_ref.clone();
        self.watchdogs.arm(
            WatchdogKind::RadioConnect,
            self.config.radio_connect_timeout,
            move |id| {
                if let Some(machine) = weak.upgrade() {
                    machine.on_radio_connect_expired(id);
                }
            },
        );
    }

    fn on_radio_connect_expired(&self, id: TimerId) {
        let _guard = self.session.lock();
        if !self.watchdogs.claim(WatchdogKind::RadioConnect, id) {
            return;
        }
        if self.radio.on_timeout() == RadioAction::Resume {
            self.resume_discovery();
        }
    }

    fn arm_friendly_name_retry(&self) {
        let weak = self.self_ref.clone();
        self.watchdogs.arm_repeating(
            WatchdogKind::FriendlyNameRetry,
            self.config.friendly_name_retry_interval,
            move |id| {
                let Some(machine) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let _guard = machine.session.lock();
                if !machine
                    .watchdogs
                    .is_current(WatchdogKind::FriendlyNameRetry, id)
                {
                    return ControlFlow::Break(());
                }
                if machine.refresh_friendly_name() {
                    machine
                        .watchdogs
                        .claim(WatchdogKind::FriendlyNameRetry, id);
                    ControlFlow::Break(())
                } else {
                    log::debug!("[Session] Friendly name still unavailable");
                    ControlFlow::Continue(())
                }
            },
        );
    }
}

impl Drop for SessionMachine {
    fn drop(&mut self) {
        self.watchdogs.cancel_all();
    }
}
