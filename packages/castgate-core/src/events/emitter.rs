//! Event emitter abstraction for decoupling the session machine from transport.
//!
//! The machine depends on the [`EventEmitter`] trait rather than the hub or a
//! broadcast channel, which keeps it testable with recording fakes.

use std::sync::Arc;

use super::{SessionNotification, StateEvent};

/// Trait for publishing session events without knowledge of transport.
///
/// Implementations must not call back into the session machine synchronously.
pub trait EventEmitter: Send + Sync {
    /// Publishes a public notification (connection request, error, launch).
    fn emit_notification(&self, event: SessionNotification);

    /// Publishes a state change.
    fn emit_state(&self, event: StateEvent);
}

/// No-op emitter. Events are silently discarded.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_notification(&self, _event: SessionNotification) {}

    fn emit_state(&self, _event: StateEvent) {}
}

/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_notification(&self, event: SessionNotification) {
        tracing::debug!(?event, "session_notification");
    }

    fn emit_state(&self, event: StateEvent) {
        tracing::debug!(?event, "state_event");
    }
}

/// Forwards every event to each inner emitter in order.
pub struct FanoutEmitter {
    emitters: Vec<Arc<dyn EventEmitter>>,
}

impl FanoutEmitter {
    pub fn new(emitters: Vec<Arc<dyn EventEmitter>>) -> Self {
        Self { emitters }
    }
}

impl EventEmitter for FanoutEmitter {
    fn emit_notification(&self, event: SessionNotification) {
        for emitter in &self.emitters {
            emitter.emit_notification(event.clone());
        }
    }

    fn emit_state(&self, event: StateEvent) {
        for emitter in &self.emitters {
            emitter.emit_state(event.clone());
        }
    }
}
