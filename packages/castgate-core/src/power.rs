//! Device power-state tracking.
//!
//! The tracker only records state and decides; the session machine executes
//! the resulting [`PowerAction`] so that enabling and disabling discovery goes
//! through a single code path.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Device power mode as reported by the power manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    On,
    Standby,
    StandbyLightSleep,
    StandbyDeepSleep,
    #[default]
    Unknown,
}

/// What the session machine must do after a power-mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    /// Nothing to do.
    Ignore,
    /// Woke up with discovery previously active: resume it asynchronously.
    Resume,
    /// Going to sleep: cancel watchdogs, and stop discovery if `stop_discovery`.
    Suspend { stop_discovery: bool },
}

#[derive(Debug, Default)]
struct PowerInner {
    state: PowerState,
    network_standby: bool,
    was_active_before_sleep: bool,
}

impl PowerInner {
    fn suspends_discovery(&self, state: PowerState) -> bool {
        match state {
            PowerState::StandbyDeepSleep => true,
            PowerState::StandbyLightSleep => !self.network_standby,
            _ => false,
        }
    }
}

/// Last-known power state plus the flag carried across a sleep/wake cycle.
#[derive(Debug, Default)]
pub struct PowerStateTracker {
    inner: Mutex<PowerInner>,
}

impl PowerStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a power-mode transition and decides the reaction.
    ///
    /// `service_enabled` is the operator's intent at the time of the change.
    pub fn on_mode_changed(
        &self,
        old: PowerState,
        new: PowerState,
        service_enabled: bool,
    ) -> PowerAction {
        let mut inner = self.inner.lock();
        if inner.state != old {
            log::debug!(
                "[Power] Reported previous mode {:?} differs from tracked {:?}",
                old,
                inner.state
            );
        }
        let was_suspended = inner.suspends_discovery(inner.state);
        inner.state = new;

        if new == PowerState::On {
            if inner.was_active_before_sleep && service_enabled {
                inner.was_active_before_sleep = false;
                return PowerAction::Resume;
            }
            return PowerAction::Ignore;
        }

        if inner.suspends_discovery(new) && !was_suspended {
            if service_enabled {
                inner.was_active_before_sleep = true;
            }
            return PowerAction::Suspend {
                stop_discovery: service_enabled,
            };
        }

        PowerAction::Ignore
    }

    /// Records whether the device stays reachable on the network in standby.
    pub fn set_network_standby(&self, enabled: bool) {
        self.inner.lock().network_standby = enabled;
    }

    pub fn network_standby(&self) -> bool {
        self.inner.lock().network_standby
    }

    pub fn state(&self) -> PowerState {
        self.inner.lock().state
    }

    /// `true` while the current power mode forbids discovery.
    pub fn is_suspended(&self) -> bool {
        let inner = self.inner.lock();
        inner.suspends_discovery(inner.state)
    }

    pub fn was_active_before_sleep(&self) -> bool {
        self.inner.lock().was_active_before_sleep
    }

    /// Consumes the sleep flag if set and the device is awake again.
    ///
    /// Used when discovery is re-enabled by the operator after a sleep cycle.
    pub fn take_resume_flag(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.was_active_before_sleep && !inner.suspends_discovery(inner.state) {
            inner.was_active_before_sleep = false;
            true
        } else {
            false
        }
    }

    /// The operator enabled the service while asleep: resume on wake.
    ///
    /// Returns `true` if the device is currently suspended.
    pub fn defer_until_wake(&self) -> bool {
        let mut inner = self.inner.lock();
        let suspended = inner.suspends_discovery(inner.state);
        if suspended {
            inner.was_active_before_sleep = true;
        }
        suspended
    }

    /// Resets to defaults (service deinitialization).
    pub fn reset(&self) {
        *self.inner.lock() = PowerInner::default();
    }
}
