//! Task spawning and the dedicated watchdog event loop.
//!
//! Two execution contexts exist in the core:
//!
//! - [`TaskSpawner`]: fire-and-forget async work such as notification
//!   delivery, spawned onto whatever runtime the host provides.
//! - [`EventLoop`]: a single-threaded Tokio runtime on its own OS thread.
//!   Every watchdog callback runs there, so timer expiries are serialized
//!   with each other and never run on a caller's thread.

use std::future::Future;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// Services spawn asynchronous work through this trait so that they do not
/// need to know which runtime they are embedded in.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    /// Returns the underlying runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

/// A single-threaded event loop running on a dedicated OS thread.
///
/// The loop owns a current-thread Tokio runtime with timers enabled. It runs
/// until [`EventLoop::shutdown`] is called or the loop is dropped.
pub struct EventLoop {
    handle: Handle,
    cancel: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Starts a new event loop thread with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned or the runtime fails
    /// to initialize.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(1);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let loop_name = name.to_string();

        let thread = thread::Builder::new().name(name.into()).spawn(move || {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };

            if tx.send(Ok(runtime.handle().clone())).is_err() {
                log::error!("[EventLoop] {}: caller went away before startup", loop_name);
                return;
            }

            runtime.block_on(async {
                cancel_clone.cancelled().await;
                log::info!("[EventLoop] {} shutting down", loop_name);
            });
        })?;

        // std channel: this constructor may run inside another runtime's context
        let handle = rx
            .recv()
            .map_err(|_| std::io::Error::other("event loop thread exited during startup"))??;

        log::info!("[EventLoop] {} started", name);

        Ok(Self {
            handle,
            cancel,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Returns a handle for scheduling work on the loop.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Stops the loop and waits for its thread to exit.
    ///
    /// Pending timers are dropped without firing. Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();

        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if let Err(e) = thread.join() {
                log::error!("[EventLoop] Loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
