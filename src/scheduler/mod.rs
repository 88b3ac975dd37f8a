//! # Scheduler
//!
//! Drives the engine's background compaction worker: one thread that
//! wakes on whichever comes first — an explicit notification (typically
//! "a flush just completed") or a fixed interval timer — and runs a
//! caller-supplied tick closure. Repeated notifications that arrive before
//! the worker gets around to running are coalesced into a single pending
//! flag, so a burst of flushes only produces one compaction pass rather
//! than one per flush.
//!
//! [`crate::db::Db`] owns one [`Scheduler`] per open database, ticking its
//! engine's [`Engine::minor_compact`](crate::engine::Engine::minor_compact)
//! and [`Engine::tombstone_compact`](crate::engine::Engine::tombstone_compact).
//! Flush itself is driven by `Db`'s own worker pool (queued, not timed) —
//! the scheduler only owns the compaction side of the wakeup model
//! described for the concurrency model's worker split.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A cheap, cloneable handle that can wake a [`Scheduler`]'s worker from
/// any thread, without needing access to the `Scheduler` itself (which
/// owns the non-`Clone` [`JoinHandle`]).
#[derive(Clone)]
pub struct SchedulerHandle {
    pending: Arc<(Mutex<bool>, Condvar)>,
}

impl SchedulerHandle {
    /// Wakes the worker at the next opportunity.
    pub fn notify(&self) {
        let (lock, cvar) = &*self.pending;
        let mut guard = match lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = true;
        cvar.notify_one();
    }
}

/// A periodic-or-notified background tick driver.
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    pending: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the worker thread. `on_tick` runs once per wakeup — either
    /// the `interval` timer elapsing or [`Self::notify`] being called —
    /// and again immediately if another notification arrived while it was
    /// running.
    pub fn start(
        name: impl Into<String>,
        interval: Duration,
        mut on_tick: impl FnMut() + Send + 'static,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new((Mutex::new(false), Condvar::new()));

        let shutdown_worker = shutdown.clone();
        let pending_worker = pending.clone();

        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let (lock, cvar) = &*pending_worker;
                loop {
                    if shutdown_worker.load(Ordering::SeqCst) {
                        break;
                    }

                    let mut guard = match lock.lock() {
                        Ok(g) => g,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if !*guard {
                        let result = match cvar.wait_timeout(guard, interval) {
                            Ok(r) => r,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard = result.0;
                    }

                    if shutdown_worker.load(Ordering::SeqCst) {
                        break;
                    }

                    *guard = false;
                    drop(guard);

                    on_tick();
                }
            })
            .expect("failed to spawn scheduler thread");

        Scheduler {
            shutdown,
            pending,
            handle: Some(handle),
        }
    }

    /// Wakes the worker at the next opportunity. Safe to call from any
    /// thread, any number of times — concurrent notifications before the
    /// worker runs collapse into a single tick.
    pub fn notify(&self) {
        self.handle().notify();
    }

    /// Returns a cloneable handle other threads can use to call
    /// [`SchedulerHandle::notify`] without borrowing the scheduler itself.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            pending: self.pending.clone(),
        }
    }

    /// Signals the worker to stop and blocks until it exits. Any tick
    /// already in flight is allowed to complete first.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}
