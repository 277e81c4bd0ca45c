//! Scenario tests for the session machine, driven with virtual time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use super::*;
use crate::controller::{DiscoveryController, FriendlyNameSource, PlayerBridge};
use crate::events::{DiscoveryCommand, EventEmitter, SessionNotification, StateEvent};
use crate::power::PowerState;
use crate::radio::WifiState;
use crate::watchdog::{Scheduler, WatchdogKind};

const PEER_MAC: &str = "AA:BB:CC:DD:EE:01";
const PEER_NAME: &str = "Pixel";
const OTHER_MAC: &str = "AA:BB:CC:DD:EE:02";
const OTHER_NAME: &str = "Galaxy";

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingDiscovery {
    calls: Mutex<Vec<DiscoveryCommand>>,
    /// When set, an accepted connection immediately reports this launch.
    launch_on_accept: Option<LaunchContext>,
    machine: OnceLock<Weak<SessionMachine>>,
}

impl RecordingDiscovery {
    fn record(&self, command: DiscoveryCommand) {
        self.calls.lock().push(command);
    }

    fn calls(&self) -> Vec<DiscoveryCommand> {
        self.calls.lock().clone()
    }

    fn count(&self, wanted: &DiscoveryCommand) -> usize {
        self.calls.lock().iter().filter(|c| *c == wanted).count()
    }

    fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl DiscoveryController for RecordingDiscovery {
    fn restart_discovery(&self) {
        self.record(DiscoveryCommand::RestartDiscovery);
    }

    fn stop_discovery(&self) {
        self.record(DiscoveryCommand::StopDiscovery);
    }

    fn accept_client_connection(&self, decision: ConnectionDecision) {
        self.record(DiscoveryCommand::AcceptClientConnection { decision });

        if decision == ConnectionDecision::Accept {
            let machine = self.machine.get().and_then(Weak::upgrade);
            if let (Some(machine), Some(launch)) = (machine, self.launch_on_accept.clone()) {
                machine.dispatch(SessionEvent::LaunchRequest {
                    launch,
                    connection_reported: true,
                });
            }
        }
    }

    fn restart_session_discovery(&self, mac: &str) {
        self.record(DiscoveryCommand::RestartSessionDiscovery {
            mac: mac.to_string(),
        });
    }

    fn switch_launch_request_context(&self, launch: &LaunchContext) {
        self.record(DiscoveryCommand::SwitchLaunchRequestContext {
            launch: launch.clone(),
        });
    }

    fn flush_current_session(&self) {
        self.record(DiscoveryCommand::FlushCurrentSession);
    }

    fn set_p2p_backend_discovery(&self, enabled: bool) {
        self.record(DiscoveryCommand::SetP2pBackendDiscovery { enabled });
    }

    fn set_friendly_name(&self, name: &str) {
        self.record(DiscoveryCommand::SetFriendlyName {
            friendly_name: name.to_string(),
        });
    }
}

#[derive(Default)]
struct RecordingPlayer {
    launches: Mutex<Vec<LaunchContext>>,
}

impl PlayerBridge for RecordingPlayer {
    fn begin_playback(&self, launch: &LaunchContext) {
        self.launches.lock().push(launch.clone());
    }
}

#[derive(Default)]
struct RecordingEmitter {
    notifications: Mutex<Vec<SessionNotification>>,
    states: Mutex<Vec<StateEvent>>,
}

impl RecordingEmitter {
    fn notifications(&self) -> Vec<SessionNotification> {
        self.notifications.lock().clone()
    }

    fn transitions(&self) -> Vec<SessionState> {
        self.states
            .lock()
            .iter()
            .filter_map(|event| match event {
                StateEvent::Changed { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    fn error_codes(&self) -> Vec<(String, u32)> {
        self.notifications
            .lock()
            .iter()
            .filter_map(|n| match n {
                SessionNotification::ClientConnectionError {
                    mac, reason_code, ..
                } => Some((mac.clone(), *reason_code)),
                _ => None,
            })
            .collect()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_notification(&self, event: SessionNotification) {
        self.notifications.lock().push(event);
    }

    fn emit_state(&self, event: StateEvent) {
        self.states.lock().push(event);
    }
}

/// Returns `None` for the first `misses` lookups.
struct FlakyName {
    misses: usize,
    lookups: AtomicUsize,
}

impl FriendlyNameSource for FlakyName {
    fn friendly_name(&self) -> Option<String> {
        let attempt = self.lookups.fetch_add(1, Ordering::SeqCst);
        (attempt >= self.misses).then(|| "Living Room TV".to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    machine: Arc<SessionMachine>,
    discovery: Arc<RecordingDiscovery>,
    player: Arc<RecordingPlayer>,
    emitter: Arc<RecordingEmitter>,
}

fn build(
    config: SessionConfig,
    discovery: RecordingDiscovery,
    friendly_name: Option<Arc<dyn FriendlyNameSource>>,
) -> Harness {
    let discovery = Arc::new(discovery);
    let player = Arc::new(RecordingPlayer::default());
    let emitter = Arc::new(RecordingEmitter::default());

    let machine = SessionMachine::new(
        config,
        SessionDeps {
            discovery: discovery.clone(),
            player: player.clone(),
            emitter: emitter.clone(),
            friendly_name,
        },
        Scheduler::new(Handle::current()),
    );
    let _ = discovery.machine.set(Arc::downgrade(&machine));

    Harness {
        machine,
        discovery,
        player,
        emitter,
    }
}

fn harness() -> Harness {
    build(SessionConfig::default(), RecordingDiscovery::default(), None)
}

fn auto_harness() -> Harness {
    let config = SessionConfig {
        auto_accept: true,
        ..SessionConfig::default()
    };
    build(config, RecordingDiscovery::default(), None)
}

fn launch_from(mac: &str, name: &str) -> LaunchContext {
    LaunchContext {
        source_ip: "192.168.49.10".parse().unwrap(),
        source_mac: mac.to_string(),
        source_name: name.to_string(),
        sink_ip: "192.168.49.1".parse().unwrap(),
    }
}

fn restart_for(mac: &str) -> DiscoveryCommand {
    DiscoveryCommand::RestartSessionDiscovery {
        mac: mac.to_string(),
    }
}

/// Asserts the pending-peer invariant on the current snapshot.
fn assert_pending_invariant(machine: &SessionMachine) {
    let snapshot = machine.snapshot();
    assert_eq!(
        snapshot.pending_peer.is_some(),
        snapshot.state.holds_pending_peer(),
        "pending peer {:?} in state {}",
        snapshot.pending_peer,
        snapshot.state
    );
}

impl Harness {
    fn enabled(self) -> Self {
        self.machine.set_enabled(true).unwrap();
        self
    }

    fn connecting(self) -> Self {
        self.machine.on_connection_request(PEER_MAC, PEER_NAME);
        self
    }

    fn accepted(self) -> Self {
        self.machine.accept_client_connection("Accept").unwrap();
        self
    }

    fn launched(self) -> Self {
        self.machine
            .on_launch_request(launch_from(PEER_MAC, PEER_NAME), true);
        self
    }

    fn state(&self) -> SessionState {
        self.machine.state()
    }
}

async fn run_deferred() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Enable / Disable
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn enabling_twice_is_the_same_as_once() {
    let h = harness();

    let first = h.machine.set_enabled(true).unwrap();
    let second = h.machine.set_enabled(true).unwrap();

    assert_eq!(first, Ack::done());
    assert!(second.success);
    assert_eq!(second.message.as_deref(), Some("Service already enabled"));
    assert_eq!(h.discovery.calls(), vec![DiscoveryCommand::RestartDiscovery]);
    assert_eq!(h.state(), SessionState::Discoverable);
    assert!(h.machine.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn disabling_stops_discovery_and_cancels_watchdogs() {
    let h = harness().enabled().connecting();
    assert!(h.machine.snapshot().armed_watchdogs.contains(&WatchdogKind::ConnectionAccept));

    let ack = h.machine.set_enabled(false).unwrap();

    assert!(ack.success);
    assert_eq!(h.state(), SessionState::Idle);
    assert!(h.machine.snapshot().armed_watchdogs.is_empty());
    assert_eq!(h.discovery.count(&DiscoveryCommand::StopDiscovery), 1);
    assert_pending_invariant(&h.machine);

    let again = h.machine.set_enabled(false).unwrap();
    assert_eq!(again.message.as_deref(), Some("Service already disabled"));
    assert_eq!(h.discovery.count(&DiscoveryCommand::StopDiscovery), 1);

    // The cancelled watchdog never fires
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.emitter.error_codes().is_empty());
    assert_eq!(h.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn connection_request_while_disabled_is_rejected() {
    let h = harness();

    h.machine.on_connection_request(PEER_MAC, PEER_NAME);

    assert_eq!(h.state(), SessionState::Idle);
    assert_eq!(
        h.discovery.calls(),
        vec![DiscoveryCommand::AcceptClientConnection {
            decision: ConnectionDecision::Reject
        }]
    );
    assert!(h.emitter.notifications().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Negotiation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_into_session_restart() {
    let h = harness().enabled().connecting();

    assert_eq!(h.state(), SessionState::Connecting);
    assert!(matches!(
        h.emitter.notifications().as_slice(),
        [SessionNotification::ClientConnectionRequest { .. }]
    ));
    assert_pending_invariant(&h.machine);

    tokio::time::sleep(Duration::from_millis(39_999)).await;
    assert_eq!(h.state(), SessionState::Connecting);

    tokio::time::sleep(Duration::from_millis(2)).await;
    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::RestartingSession);
    assert!(snapshot.pending_peer.is_none());
    assert_eq!(snapshot.player_state, PlayerState::Idle);
    assert!(snapshot.armed_watchdogs.is_empty());
    assert_eq!(h.discovery.count(&restart_for(PEER_MAC)), 1);
    assert_eq!(
        h.emitter.error_codes(),
        vec![(PEER_MAC.to_string(), StopReason::Timeout.code())]
    );

    h.machine.on_discovery_restarted();
    assert_eq!(h.state(), SessionState::Discoverable);
}

#[tokio::test(start_paused = true)]
async fn accept_cancels_the_accept_watchdog() {
    let h = harness().enabled().connecting();

    let ack = h.machine.accept_client_connection("Accept").unwrap();

    assert_eq!(ack, Ack::done());
    assert_eq!(h.state(), SessionState::ConnectionAccepted);
    assert!(h.machine.snapshot().armed_watchdogs.is_empty());
    assert_eq!(
        h.discovery.calls().last(),
        Some(&DiscoveryCommand::AcceptClientConnection {
            decision: ConnectionDecision::Accept
        })
    );
    assert_pending_invariant(&h.machine);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.state(), SessionState::ConnectionAccepted);
    assert!(h.emitter.error_codes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reject_waits_for_discovery_restart() {
    let h = harness().enabled().connecting();

    h.machine.accept_client_connection("Reject").unwrap();
    assert_eq!(h.state(), SessionState::ConnectionRejected);
    assert_pending_invariant(&h.machine);

    h.machine.dispatch(SessionEvent::DiscoveryRestarted);
    assert_eq!(h.state(), SessionState::Discoverable);
}

#[tokio::test(start_paused = true)]
async fn invalid_decision_changes_nothing() {
    let h = harness().enabled().connecting();

    let err = h.machine.accept_client_connection("Maybe").unwrap_err();

    assert_eq!(err, SessionError::InvalidDecision("Maybe".to_string()));
    assert_eq!(h.state(), SessionState::Connecting);
    assert!(h.machine.snapshot().armed_watchdogs.contains(&WatchdogKind::ConnectionAccept));
}

#[tokio::test(start_paused = true)]
async fn decision_without_pending_request_is_stale() {
    let h = harness().enabled();

    let ack = h.machine.accept_client_connection("Accept").unwrap();

    assert!(!ack.success);
    assert!(ack.message.is_some());
    assert_eq!(h.state(), SessionState::Discoverable);
}

#[tokio::test(start_paused = true)]
async fn repeated_request_rearms_a_single_watchdog() {
    let h = harness().enabled().connecting();

    tokio::time::sleep(Duration::from_secs(20)).await;
    h.machine.on_connection_request(PEER_MAC, PEER_NAME);

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(h.state(), SessionState::Connecting);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.state(), SessionState::RestartingSession);
    assert_eq!(h.emitter.error_codes().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Launch and Player
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn launch_after_accept_blocks_disable() {
    let h = harness().enabled().connecting().accepted().launched();

    assert_eq!(h.state(), SessionState::PlayerLaunched);
    assert!(matches!(
        h.emitter.notifications().last(),
        Some(SessionNotification::LaunchRequest { source_mac, .. }) if source_mac == PEER_MAC
    ));
    assert!(h.player.launches.lock().is_empty());

    let err = h.machine.set_enabled(false).unwrap_err();
    assert!(matches!(err, SessionError::PolicyViolation(_)));
    assert!(h.machine.is_enabled());
    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

#[tokio::test(start_paused = true)]
async fn launch_after_session_restart_is_ignored() {
    let h = harness().enabled().connecting();
    tokio::time::sleep(Duration::from_secs(41)).await;

    h.machine
        .on_launch_request(launch_from(PEER_MAC, PEER_NAME), true);

    assert_eq!(h.state(), SessionState::RestartingSession);
    assert!(!h
        .emitter
        .notifications()
        .iter()
        .any(|n| matches!(n, SessionNotification::LaunchRequest { .. })));
}

#[tokio::test(start_paused = true)]
async fn stop_for_new_connection_flushes_without_restart() {
    let h = harness().enabled().connecting().accepted().launched();
    h.discovery.clear();

    let ack = h
        .machine
        .update_player_state(PEER_MAC, "Stopped", StopReason::NewConnection.code())
        .unwrap();

    assert!(ack.success);
    assert_eq!(h.discovery.calls(), vec![DiscoveryCommand::FlushCurrentSession]);
    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

#[tokio::test(start_paused = true)]
async fn app_requested_stop_restarts_session_discovery() {
    let h = harness().enabled().connecting().accepted().launched();
    h.machine.update_player_state(PEER_MAC, "Playing", 0).unwrap();

    h.machine
        .update_player_state(PEER_MAC, "Stopped", StopReason::AppRequested.code())
        .unwrap();

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::RestartingSession);
    assert_eq!(snapshot.player_state, PlayerState::Stopped);
    assert!(snapshot.active_peer.is_none());
    assert_eq!(h.discovery.count(&restart_for(PEER_MAC)), 1);
    assert!(h.emitter.error_codes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_while_discoverable_leaves_discovery_alone() {
    let h = harness().enabled();
    h.discovery.clear();

    let ack = h
        .machine
        .update_player_state(PEER_MAC, "Stopped", StopReason::AppRequested.code())
        .unwrap();

    assert!(ack.success);
    assert_eq!(ack.message.as_deref(), Some("No session to end"));
    assert_eq!(h.state(), SessionState::Discoverable);
    assert!(h.discovery.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_playback_reports_connection_error() {
    let h = harness().enabled().connecting().accepted().launched();

    h.machine
        .update_player_state(PEER_MAC, "stopped", StopReason::InternalFailure.code())
        .unwrap();

    assert_eq!(h.state(), SessionState::RestartingSession);
    assert!(matches!(
        h.emitter.notifications().last(),
        Some(SessionNotification::ClientConnectionError { name, reason_code: 4, .. }) if name == PEER_NAME
    ));
}

#[tokio::test(start_paused = true)]
async fn unknown_player_state_is_rejected() {
    let h = harness().enabled().connecting().accepted().launched();

    let err = h
        .machine
        .update_player_state(PEER_MAC, "Buffering", 0)
        .unwrap_err();

    assert_eq!(err, SessionError::InvalidPlayerState("Buffering".into()));
    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

#[tokio::test(start_paused = true)]
async fn player_states_are_mirrored() {
    let h = harness().enabled().connecting().accepted().launched();

    for (report, expected) in [
        ("Initiated", PlayerState::Initiated),
        ("IN_PROGRESS", PlayerState::InProgress),
        ("Playing", PlayerState::Playing),
    ] {
        h.machine.update_player_state(PEER_MAC, report, 0).unwrap();
        assert_eq!(h.machine.snapshot().player_state, expected);
    }
    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

// ─────────────────────────────────────────────────────────────────────────────
// Stop Client Connection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_requires_matching_identity() {
    let h = harness().enabled().connecting().accepted();

    let err = h
        .machine
        .stop_client_connection(OTHER_MAC, PEER_NAME)
        .unwrap_err();
    assert!(matches!(err, SessionError::IdentityMismatch { .. }));
    assert_eq!(h.state(), SessionState::ConnectionAccepted);

    let ack = h
        .machine
        .stop_client_connection(&PEER_MAC.to_lowercase(), PEER_NAME)
        .unwrap();
    assert!(ack.success);
    assert_eq!(h.state(), SessionState::RestartingSession);
    assert_eq!(h.discovery.count(&restart_for(&PEER_MAC.to_lowercase())), 1);

    let transitions = h.emitter.transitions();
    assert_eq!(
        &transitions[transitions.len() - 2..],
        &[
            SessionState::AbortingConnection,
            SessionState::RestartingSession
        ]
    );

    let again = h.machine.stop_client_connection(PEER_MAC, PEER_NAME).unwrap();
    assert!(!again.success);
}

#[tokio::test(start_paused = true)]
async fn stop_after_launch_is_refused() {
    let h = harness().enabled().connecting().accepted().launched();

    let err = h
        .machine
        .stop_client_connection(PEER_MAC, PEER_NAME)
        .unwrap_err();

    assert!(matches!(err, SessionError::PolicyViolation(_)));
    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct Launch
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn direct_launch_goes_through_connection_request() {
    let h = harness().enabled();
    let launch = launch_from(PEER_MAC, PEER_NAME);

    h.machine.on_launch_request(launch.clone(), false);

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::DirectLaunchConnecting);
    let pending = snapshot.pending_peer.expect("pending peer cached");
    assert_eq!(pending.source_ip, Some(launch.source_ip));
    assert!(snapshot.session_id.is_some());
    assert_eq!(
        &h.emitter.transitions()[1..],
        &[
            SessionState::DirectLaunchRequested,
            SessionState::DirectLaunchConnecting
        ]
    );

    h.machine.accept_client_connection("Accept").unwrap();
    assert_eq!(h.state(), SessionState::ConnectionAccepted);
    assert_pending_invariant(&h.machine);
    assert_eq!(
        h.discovery.calls().last(),
        Some(&DiscoveryCommand::SwitchLaunchRequestContext {
            launch: launch.clone()
        })
    );

    h.machine.on_launch_request(launch, true);
    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

#[tokio::test(start_paused = true)]
async fn rejected_direct_launch_restarts_for_that_peer() {
    let h = harness().enabled();
    h.machine
        .on_launch_request(launch_from(PEER_MAC, PEER_NAME), false);

    h.machine.accept_client_connection("Reject").unwrap();

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::RestartingSession);
    assert_eq!(snapshot.player_state, PlayerState::Idle);
    assert!(snapshot.pending_peer.is_none());
    assert_eq!(h.discovery.count(&restart_for(PEER_MAC)), 1);
    assert!(h.emitter.transitions().contains(&SessionState::ConnectionRejected));
}

// ─────────────────────────────────────────────────────────────────────────────
// Automatic Accept and Preemption
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn auto_accept_skips_public_notifications() {
    let h = auto_harness().enabled().connecting();

    assert_eq!(h.state(), SessionState::ConnectionAccepted);
    assert!(h.emitter.notifications().is_empty());
    assert!(h.machine.snapshot().armed_watchdogs.is_empty());

    let h = h.launched();
    assert_eq!(h.state(), SessionState::PlayerLaunched);
    assert_eq!(h.player.launches.lock().len(), 1);
    assert!(h.emitter.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn preempting_request_supersedes_the_playing_session() {
    let h = harness().enabled().connecting().accepted().launched();

    h.machine.update_player_state(PEER_MAC, "Playing", 0).unwrap();
    h.machine.on_connection_request(OTHER_MAC, OTHER_NAME);

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::Connecting);
    assert_eq!(
        snapshot.preempting_peer,
        Some(PeerIdentity::new(OTHER_MAC, OTHER_NAME))
    );

    // The old player winding down must not restart discovery under the new request
    let ack = h
        .machine
        .update_player_state(PEER_MAC, "Stopped", StopReason::AppRequested.code())
        .unwrap();
    assert!(!ack.success);
    assert_eq!(h.state(), SessionState::Connecting);
    assert_eq!(h.discovery.count(&restart_for(PEER_MAC)), 0);
    assert_eq!(h.machine.snapshot().player_state, PlayerState::Playing);

    h.machine.accept_client_connection("Accept").unwrap();
    let ack = h
        .machine
        .stop_client_connection(OTHER_MAC, OTHER_NAME)
        .unwrap();
    assert!(ack.success);
    assert_eq!(h.discovery.count(&restart_for(OTHER_MAC)), 1);
}

#[tokio::test(start_paused = true)]
async fn auto_preemption_reports_and_flushes_the_old_session() {
    let h = auto_harness().enabled().connecting().launched();

    h.machine.on_connection_request(OTHER_MAC, OTHER_NAME);

    assert_eq!(
        h.emitter.error_codes(),
        vec![(PEER_MAC.to_string(), StopReason::NewConnection.code())]
    );
    assert_eq!(h.discovery.count(&DiscoveryCommand::FlushCurrentSession), 1);
    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::ConnectionAccepted);
    assert_eq!(
        snapshot.active_peer,
        Some(PeerIdentity::new(OTHER_MAC, OTHER_NAME))
    );

    h.machine
        .on_launch_request(launch_from(OTHER_MAC, OTHER_NAME), true);
    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

#[tokio::test(start_paused = true)]
async fn controller_may_reenter_synchronously() {
    let discovery = RecordingDiscovery {
        launch_on_accept: Some(launch_from(PEER_MAC, PEER_NAME)),
        ..RecordingDiscovery::default()
    };
    let h = build(SessionConfig::default(), discovery, None)
        .enabled()
        .connecting();

    h.machine.accept_client_connection("Accept").unwrap();

    assert_eq!(h.state(), SessionState::PlayerLaunched);
}

// ─────────────────────────────────────────────────────────────────────────────
// Power and Radio
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deep_sleep_suspends_and_wake_resumes() {
    let h = harness().enabled();
    h.machine
        .dispatch(SessionEvent::PowerModeChanged {
            old: PowerState::Unknown,
            new: PowerState::On,
        });
    h.discovery.clear();

    h.machine
        .on_power_mode_changed(PowerState::On, PowerState::StandbyDeepSleep);

    let snapshot = h.machine.snapshot();
    assert_eq!(h.discovery.calls(), vec![DiscoveryCommand::StopDiscovery]);
    assert!(snapshot.was_active_before_sleep);
    assert!(!snapshot.discovery_active);
    assert!(snapshot.service_enabled);
    assert_eq!(snapshot.state, SessionState::Idle);

    h.machine
        .on_power_mode_changed(PowerState::StandbyDeepSleep, PowerState::On);
    run_deferred().await;

    let snapshot = h.machine.snapshot();
    assert_eq!(
        h.discovery.calls(),
        vec![
            DiscoveryCommand::StopDiscovery,
            DiscoveryCommand::RestartDiscovery
        ]
    );
    assert!(!snapshot.was_active_before_sleep);
    assert_eq!(snapshot.state, SessionState::Discoverable);
}

#[tokio::test(start_paused = true)]
async fn sleep_cancels_watchdogs_and_drops_negotiation() {
    let h = harness().enabled().connecting();

    h.machine
        .on_power_mode_changed(PowerState::On, PowerState::StandbyDeepSleep);

    assert_eq!(h.state(), SessionState::Idle);
    assert!(h.machine.snapshot().armed_watchdogs.is_empty());
    assert_pending_invariant(&h.machine);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.emitter.error_codes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn enabling_while_asleep_starts_discovery_on_wake() {
    let h = harness();
    h.machine
        .on_power_mode_changed(PowerState::On, PowerState::StandbyDeepSleep);

    h.machine.set_enabled(true).unwrap();
    assert!(h.discovery.calls().is_empty());

    h.machine
        .on_power_mode_changed(PowerState::StandbyDeepSleep, PowerState::On);
    run_deferred().await;

    assert_eq!(h.discovery.calls(), vec![DiscoveryCommand::RestartDiscovery]);
    assert_eq!(h.state(), SessionState::Discoverable);
}

#[tokio::test(start_paused = true)]
async fn light_sleep_without_network_standby_suspends() {
    let h = harness().enabled();
    h.machine
        .dispatch(SessionEvent::NetworkStandbyChanged { enabled: false });

    h.machine
        .on_power_mode_changed(PowerState::On, PowerState::StandbyLightSleep);

    assert_eq!(h.discovery.count(&DiscoveryCommand::StopDiscovery), 1);
    assert_eq!(h.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn wifi_connect_suppresses_until_connected() {
    let h = harness().enabled();

    h.machine
        .dispatch(SessionEvent::WifiStateChanged {
            state: WifiState::Connecting,
        });

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.radio_connecting);
    assert!(snapshot.service_enabled);
    assert_eq!(snapshot.armed_watchdogs, vec![WatchdogKind::RadioConnect]);

    h.machine.on_wifi_state_changed(WifiState::Connected);

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::Discoverable);
    assert!(snapshot.armed_watchdogs.is_empty());
    assert_eq!(h.discovery.count(&DiscoveryCommand::RestartDiscovery), 2);
}

#[tokio::test(start_paused = true)]
async fn wifi_connect_timeout_resumes_discovery() {
    let h = harness().enabled();
    h.machine.on_wifi_state_changed(WifiState::Connecting);

    tokio::time::sleep(Duration::from_millis(30_001)).await;

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::Discoverable);
    assert!(!snapshot.radio_connecting);
    assert_eq!(h.discovery.count(&DiscoveryCommand::RestartDiscovery), 2);
}

#[tokio::test(start_paused = true)]
async fn player_stop_during_deep_sleep_waits_for_wake() {
    let h = harness().enabled().connecting().accepted().launched();
    h.machine
        .on_power_mode_changed(PowerState::On, PowerState::StandbyDeepSleep);
    assert_eq!(h.state(), SessionState::PlayerLaunched);
    h.discovery.clear();

    let ack = h
        .machine
        .update_player_state(PEER_MAC, "Stopped", StopReason::AppRequested.code())
        .unwrap();

    assert!(ack.success);
    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(!snapshot.discovery_active);
    assert!(h.discovery.calls().is_empty());

    h.machine
        .on_power_mode_changed(PowerState::StandbyDeepSleep, PowerState::On);
    run_deferred().await;

    assert_eq!(h.discovery.calls(), vec![DiscoveryCommand::RestartDiscovery]);
    assert_eq!(h.state(), SessionState::Discoverable);
}

#[tokio::test(start_paused = true)]
async fn accept_timeout_while_wifi_connects_waits_for_radio() {
    let h = harness().enabled().connecting();
    tokio::time::sleep(Duration::from_secs(20)).await;
    h.machine.on_wifi_state_changed(WifiState::Connecting);
    h.discovery.clear();

    tokio::time::sleep(Duration::from_millis(20_001)).await;

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.pending_peer.is_none());
    assert_eq!(
        h.emitter.error_codes(),
        vec![(PEER_MAC.to_string(), StopReason::Timeout.code())]
    );
    assert_eq!(h.discovery.count(&restart_for(PEER_MAC)), 0);
    assert_pending_invariant(&h.machine);

    h.machine.on_wifi_state_changed(WifiState::Connected);

    assert_eq!(h.discovery.calls(), vec![DiscoveryCommand::RestartDiscovery]);
    assert_eq!(h.state(), SessionState::Discoverable);
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn friendly_name_is_retried_until_available() {
    let source = Arc::new(FlakyName {
        misses: 3,
        lookups: AtomicUsize::new(0),
    });
    let h = build(
        SessionConfig::default(),
        RecordingDiscovery::default(),
        Some(source.clone() as Arc<dyn FriendlyNameSource>),
    );

    h.machine.start();
    assert_eq!(
        h.machine.snapshot().armed_watchdogs,
        vec![WatchdogKind::FriendlyNameRetry]
    );

    tokio::time::sleep(Duration::from_millis(15_001)).await;

    assert_eq!(source.lookups.load(Ordering::SeqCst), 4);
    assert_eq!(
        h.discovery.calls(),
        vec![DiscoveryCommand::SetFriendlyName {
            friendly_name: "Living Room TV".into()
        }]
    );
    let snapshot = h.machine.snapshot();
    assert!(snapshot.armed_watchdogs.is_empty());
    assert_eq!(snapshot.friendly_name.as_deref(), Some("Living Room TV"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.lookups.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn start_enables_when_configured() {
    let config = SessionConfig {
        enable_on_start: true,
        ..SessionConfig::default()
    };
    let h = build(config, RecordingDiscovery::default(), None);

    h.machine.start();

    assert!(h.machine.is_enabled());
    assert_eq!(h.state(), SessionState::Discoverable);
}

#[tokio::test(start_paused = true)]
async fn shutdown_resets_everything() {
    let h = harness().enabled().connecting();
    h.machine.on_wifi_state_changed(WifiState::Connected);

    h.machine.shutdown();

    let snapshot = h.machine.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(!snapshot.service_enabled);
    assert!(!snapshot.discovery_active);
    assert!(snapshot.pending_peer.is_none());
    assert!(snapshot.armed_watchdogs.is_empty());
    assert_eq!(snapshot.wifi_state, WifiState::Unknown);
    assert_eq!(h.discovery.count(&DiscoveryCommand::StopDiscovery), 1);
}

#[tokio::test(start_paused = true)]
async fn p2p_backend_discovery_is_passed_through() {
    let h = harness();

    let ack = h.machine.set_p2p_backend_discovery(true);

    assert!(ack.success);
    assert_eq!(
        h.discovery.calls(),
        vec![DiscoveryCommand::SetP2pBackendDiscovery { enabled: true }]
    );
}

#[tokio::test(start_paused = true)]
async fn pending_peer_invariant_holds_across_a_full_session() {
    let h = harness();
    let steps: Vec<Box<dyn Fn(&SessionMachine)>> = vec![
        Box::new(|m: &SessionMachine| {
            m.set_enabled(true).unwrap();
        }),
        Box::new(|m: &SessionMachine| m.on_launch_request(launch_from(PEER_MAC, PEER_NAME), false)),
        Box::new(|m: &SessionMachine| {
            m.accept_client_connection("Accept").unwrap();
        }),
        Box::new(|m: &SessionMachine| m.on_launch_request(launch_from(PEER_MAC, PEER_NAME), true)),
        Box::new(|m: &SessionMachine| m.on_connection_request(OTHER_MAC, OTHER_NAME)),
        Box::new(|m: &SessionMachine| {
            m.update_player_state(PEER_MAC, "Stopped", 3).unwrap();
        }),
        Box::new(|m: &SessionMachine| {
            m.accept_client_connection("Reject").unwrap();
        }),
        Box::new(|m: &SessionMachine| m.on_discovery_restarted()),
    ];

    for step in steps {
        step(&h.machine);
        assert_pending_invariant(&h.machine);
    }
    assert_eq!(h.state(), SessionState::Discoverable);
}
