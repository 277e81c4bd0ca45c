//! Timer scheduler and per-kind watchdog slots.
//!
//! [`Scheduler`] spawns single-shot and periodic timers onto a runtime handle
//! (normally the dedicated [`EventLoop`](crate::runtime::EventLoop)) and
//! returns a cancellable [`TimerHandle`] for each.
//!
//! [`Watchdogs`] layers the "one instance per kind" rule on top: arming a
//! kind that is already armed cancels the previous instance first. Every
//! armed instance carries a [`TimerId`]; expiry callbacks must
//! [`claim`](Watchdogs::claim) their id under the session lock before acting,
//! which resolves the race between an expiry that is already running and a
//! concurrent cancel or re-arm.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Identifier of one armed timer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Cancellable handle to a scheduled timer.
#[derive(Debug)]
pub struct TimerHandle {
    id: TimerId,
    task: AbortHandle,
}

impl TimerHandle {
    /// Returns the timer's id.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Cancels the timer. Cancelling a fired or already-cancelled timer is a no-op.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns `true` once the timer task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns typed timer callbacks onto a runtime.
#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    /// Creates a scheduler that runs callbacks on the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn allocate_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs `callback` once after `delay`.
    pub fn once<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.allocate_id();
        self.once_with_id(id, delay, callback)
    }

    fn once_with_id<F>(&self, id: TimerId, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            callback();
        });

        TimerHandle {
            id,
            task: task.abort_handle(),
        }
    }

    /// Runs `callback` every `period` until it returns [`ControlFlow::Break`].
    ///
    /// The first invocation happens one full period after scheduling.
    pub fn repeating<F>(&self, period: Duration, callback: F) -> TimerHandle
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let id = self.allocate_id();
        self.repeating_with_id(id, period, callback)
    }

    fn repeating_with_id<F>(&self, id: TimerId, period: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if callback().is_break() {
                    break;
                }
            }
        });

        TimerHandle {
            id,
            task: task.abort_handle(),
        }
    }

    /// Runs `callback` on the scheduler's runtime as soon as possible.
    ///
    /// Used to move work off the calling thread.
    pub fn defer<F>(&self, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.once(Duration::ZERO, callback)
    }
}

/// Kinds of watchdog the session machine arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchdogKind {
    /// A connection request was not accepted or rejected in time.
    ConnectionAccept,
    /// A WiFi connection attempt did not resolve in time.
    RadioConnect,
    /// Periodic retry until the device's friendly name is known.
    FriendlyNameRetry,
}

/// At-most-one-per-kind watchdog registry.
pub struct Watchdogs {
    scheduler: Scheduler,
    armed: Mutex<HashMap<WatchdogKind, TimerHandle>>,
}

impl Watchdogs {
    /// Creates an empty registry backed by `scheduler`.
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Arms a single-shot watchdog, replacing any armed instance of `kind`.
    ///
    /// The callback receives its own [`TimerId`] so it can [`claim`](Self::claim)
    /// the slot before acting.
    pub fn arm<F>(&self, kind: WatchdogKind, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        let id = self.scheduler.allocate_id();
        let handle = self.scheduler.once_with_id(id, delay, move || callback(id));
        self.install(kind, handle);
        log::debug!("[Watchdog] Armed {:?} for {:?}", kind, delay);
        id
    }

    /// Arms a periodic watchdog, replacing any armed instance of `kind`.
    pub fn arm_repeating<F>(&self, kind: WatchdogKind, period: Duration, mut callback: F) -> TimerId
    where
        F: FnMut(TimerId) -> ControlFlow<()> + Send + 'static,
    {
        let id = self.scheduler.allocate_id();
        let handle = self
            .scheduler
            .repeating_with_id(id, period, move || callback(id));
        self.install(kind, handle);
        log::debug!("[Watchdog] Armed {:?} every {:?}", kind, period);
        id
    }

    fn install(&self, kind: WatchdogKind, handle: TimerHandle) {
        if let Some(previous) = self.armed.lock().insert(kind, handle) {
            previous.cancel();
            log::debug!("[Watchdog] Replaced armed {:?}", kind);
        }
    }

    /// Cancels the armed instance of `kind`, if any.
    ///
    /// Returns `true` if something was armed.
    pub fn cancel(&self, kind: WatchdogKind) -> bool {
        match self.armed.lock().remove(&kind) {
            Some(handle) => {
                handle.cancel();
                log::debug!("[Watchdog] Cancelled {:?}", kind);
                true
            }
            None => false,
        }
    }

    /// Cancels every armed watchdog.
    pub fn cancel_all(&self) {
        for (_, handle) in self.armed.lock().drain() {
            handle.cancel();
        }
    }

    /// Removes the slot for `kind` if it still holds instance `id`.
    ///
    /// Returns `false` when the instance was cancelled or replaced in the
    /// meantime; the caller must then do nothing.
    pub fn claim(&self, kind: WatchdogKind, id: TimerId) -> bool {
        let mut armed = self.armed.lock();
        let current = armed.get(&kind).is_some_and(|handle| handle.id() == id);
        if current {
            armed.remove(&kind);
        }
        current
    }

    /// Returns `true` if instance `id` is still the armed one for `kind`.
    pub fn is_current(&self, kind: WatchdogKind, id: TimerId) -> bool {
        self.armed
            .lock()
            .get(&kind)
            .is_some_and(|handle| handle.id() == id)
    }

    /// Returns `true` if an instance of `kind` is armed and not finished.
    pub fn is_armed(&self, kind: WatchdogKind) -> bool {
        self.armed
            .lock()
            .get(&kind)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns the kinds currently armed.
    pub fn armed_kinds(&self) -> Vec<WatchdogKind> {
        let mut kinds: Vec<_> = self
            .armed
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort_by_key(|kind| *kind as u8);
        kinds
    }
}
