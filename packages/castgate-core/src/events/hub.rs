//! Notification fan-out.
//!
//! The [`NotificationHub`] sits between the session machine and its
//! consumers. Notifications are queued to a single dispatcher task that calls
//! every registered listener in publish order, so listener code never runs on
//! the thread that holds the session lock. Every event is also forwarded to a
//! `tokio::sync::broadcast` channel for WebSocket subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use super::emitter::EventEmitter;
use super::{BroadcastEvent, SessionNotification, StateEvent};
use crate::runtime::TaskSpawner;

/// Receives notifications published by the session machine.
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, notification: &SessionNotification);
}

impl<F> NotificationListener for F
where
    F: Fn(&SessionNotification) + Send + Sync,
{
    fn on_notification(&self, notification: &SessionNotification) {
        self(notification)
    }
}

/// Registration handle returned by [`NotificationHub::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerMap = DashMap<ListenerId, Arc<dyn NotificationListener>>;

/// Fans notifications out to listeners and to the broadcast channel.
///
/// Cloning is cheap; all clones share listeners, queue and channel.
#[derive(Clone)]
pub struct NotificationHub {
    listeners: Arc<ListenerMap>,
    next_listener: Arc<AtomicU64>,
    queue: mpsc::UnboundedSender<SessionNotification>,
    tx: broadcast::Sender<BroadcastEvent>,
}

impl NotificationHub {
    /// Creates a hub and spawns its dispatcher task.
    ///
    /// The dispatcher exits once every clone of the hub has been dropped.
    pub fn new<S: TaskSpawner>(capacity: usize, spawner: &S) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (queue, mut rx) = mpsc::unbounded_channel::<SessionNotification>();
        let listeners: Arc<ListenerMap> = Arc::new(DashMap::new());

        let dispatch_listeners = Arc::clone(&listeners);
        spawner.spawn(async move {
            while let Some(notification) = rx.recv().await {
                // Snapshot so a listener may (un)register without deadlocking the map
                let targets: Vec<Arc<dyn NotificationListener>> = dispatch_listeners
                    .iter()
                    .map(|entry| Arc::clone(entry.value()))
                    .collect();

                for listener in targets {
                    listener.on_notification(&notification);
                }
            }
            log::debug!("[Hub] Dispatcher stopped");
        });

        Self {
            listeners,
            next_listener: Arc::new(AtomicU64::new(1)),
            queue,
            tx,
        }
    }

    /// Registers a listener for all future notifications.
    pub fn register(&self, listener: Arc<dyn NotificationListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        log::debug!("[Hub] Registered listener {:?}", id);
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.listeners.remove(&id).is_some();
        if removed {
            log::debug!("[Hub] Unregistered listener {:?}", id);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<BroadcastEvent> {
        &self.tx
    }

    /// Sends any event on the broadcast channel only.
    pub fn publish(&self, event: impl Into<BroadcastEvent>) {
        if let Err(e) = self.tx.send(event.into()) {
            log::trace!("[Hub] No broadcast receivers: {}", e);
        }
    }
}

impl EventEmitter for NotificationHub {
    fn emit_notification(&self, event: SessionNotification) {
        if self.queue.send(event.clone()).is_err() {
            log::warn!("[Hub] Dispatcher is gone, notification not delivered to listeners");
        }
        self.publish(event);
    }

    fn emit_state(&self, event: StateEvent) {
        self.publish(event);
    }
}
