//! Shutdown signalling and background task tracking.
//!
//! A [`ShutdownTrigger`] fires once and every [`ShutdownSignal`] cloned from
//! it observes the change. The [`TaskRegistry`] owns the process-wide
//! trigger for a service and the join handles of everything it spawned.
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` for JoinHandle storage because:
//! 1. Operations are O(n) retain on spawn or O(n) drain on shutdown
//! 2. Lock is never held across `.await` points

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Firing side of a one-shot shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Create a trigger and a first signal observing it
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another observer of this trigger
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observing side of a shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires (or its trigger is dropped)
    pub async fn fired(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Tracks spawned tasks for one service and shuts them down together
#[derive(Debug)]
pub struct TaskRegistry {
    shutdown: ShutdownTrigger,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (shutdown, _signal) = ShutdownTrigger::new();
        Self {
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Spawn a task that watches the shutdown signal itself
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.track(tokio::spawn(fut));
    }

    /// Spawn a task that is dropped as soon as shutdown fires
    pub fn spawn_cancellable<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.signal();
        self.track(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.fired() => {}
                _ = fut => {}
            }
        }));
    }

    /// Run `f` every `period` (first run after one period) until shutdown
    /// or until `f` returns `false`
    pub fn spawn_interval_until<F, Fut>(&self, period: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut shutdown = self.signal();
        self.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.fired() => break,
                    _ = ticker.tick() => {
                        if !f().await {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Observer of this registry's shutdown
    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Whether shutdown has been requested
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_fired()
    }

    /// Number of tracked tasks still running
    pub fn active_tasks(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Fire shutdown and abort whatever is still running.
    ///
    /// Returns `false` when shutdown had already been requested.
    pub fn shutdown(&self) -> bool {
        if !self.shutdown.fire() {
            return false;
        }
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        true
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown.fire();
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}
