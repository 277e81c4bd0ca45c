//! Operator intent and the discovery-running decision.
//!
//! Kept under its own plain lock, separate from the session record. It is
//! only ever locked briefly and never while calling out.

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct GateInner {
    service_enabled: bool,
    active: bool,
}

#[derive(Debug, Default)]
pub(crate) struct DiscoveryGate {
    inner: Mutex<GateInner>,
}

impl DiscoveryGate {
    pub(crate) fn is_enabled(&self) -> bool {
        self.inner.lock().service_enabled
    }

    pub(crate) fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Returns `true` if the flag changed.
    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        let mut inner = self.inner.lock();
        let changed = inner.service_enabled != enabled;
        inner.service_enabled = enabled;
        changed
    }

    /// Marks discovery as running if it is wanted, allowed and not running yet.
    ///
    /// Returns `true` if the caller must start discovery.
    pub(crate) fn try_activate(&self, blocked: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.service_enabled && !inner.active && !blocked {
            inner.active = true;
            true
        } else {
            false
        }
    }

    /// Returns `true` if the caller must stop discovery.
    pub(crate) fn deactivate(&self) -> bool {
        std::mem::take(&mut self.inner.lock().active)
    }

    pub(crate) fn reset(&self) {
        *self.inner.lock() = GateInner::default();
    }
}
