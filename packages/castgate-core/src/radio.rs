//! WiFi connectivity tracking.
//!
//! While the station interface is associating, casting discovery is
//! suppressed so the two do not fight over the radio. Suppression ends when
//! the attempt resolves or the radio-connect watchdog expires.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// WiFi station state as reported by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WifiState {
    #[default]
    Unknown,
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// What the session machine must do after a radio event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioAction {
    Ignore,
    /// Stop discovery and (re)arm the radio-connect watchdog.
    Suppress,
    /// Cancel the watchdog and resume discovery if otherwise allowed.
    Resume,
}

#[derive(Debug, Default)]
struct RadioInner {
    state: WifiState,
    connecting: bool,
}

/// Last-known WiFi state and the in-progress flag.
#[derive(Debug, Default)]
pub struct RadioStateTracker {
    inner: Mutex<RadioInner>,
}

impl RadioStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a WiFi state change and decides the reaction.
    pub fn on_state_changed(&self, state: WifiState) -> RadioAction {
        let mut inner = self.inner.lock();
        inner.state = state;

        match state {
            WifiState::Connecting => {
                inner.connecting = true;
                RadioAction::Suppress
            }
            WifiState::Connected | WifiState::Failed | WifiState::Disconnected => {
                if std::mem::take(&mut inner.connecting) {
                    RadioAction::Resume
                } else {
                    RadioAction::Ignore
                }
            }
            WifiState::Unknown => RadioAction::Ignore,
        }
    }

    /// The radio-connect watchdog expired.
    pub fn on_timeout(&self) -> RadioAction {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.connecting) {
            log::warn!("[Radio] WiFi connection did not resolve in time, resuming discovery");
            RadioAction::Resume
        } else {
            RadioAction::Ignore
        }
    }

    pub fn state(&self) -> WifiState {
        self.inner.lock().state
    }

    /// `true` between a "connecting" event and its resolution.
    pub fn is_connecting(&self) -> bool {
        self.inner.lock().connecting
    }

    pub fn reset(&self) {
        *self.inner.lock() = RadioInner::default();
    }
}
