use crate::error::{Result, TelemetryError};
use crate::sync::lock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Observable state of a background poller.
///
/// `Idle → Running` on start, `Running ⇄ Degraded` while reads fail below
/// the retry budget, `→ Stopped` on close or when the budget runs out.
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    #[default]
    Idle,
    Running,
    Degraded,
    Stopped,
}

/// Uniform start/stop contract shared by every background poller.
pub trait Tracker: Send + Sync {
    /// Thread name, also used in log lines.
    fn name(&self) -> &str;

    /// Spawn the poll thread. Callers start a tracker exactly once; a second
    /// call returns [`TelemetryError::AlreadyStarted`] and a call after
    /// `close()` returns [`TelemetryError::Closed`].
    fn start(&self) -> Result<()>;

    /// Signal the loop to exit, wake it, and join the thread.
    fn close(&self);

    /// `true` from `start()` until the poll loop has actually returned.
    fn is_alive(&self) -> bool;

    fn state(&self) -> PollerState;
}

/// Callback the host invokes once per completed simulation step.
pub trait TickListener: Send + Sync {
    /// `duration_nanos` is the wall-clock time since the previous tick.
    fn on_tick_completed(&self, duration_nanos: u64);
}

// ── Shutdown ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ShutdownInner {
    triggered: Mutex<bool>,
    wake:      Condvar,
}

/// Cloneable cancellation signal.
///
/// Poll loops sleep through [`wait_timeout`](Self::wait_timeout), which
/// returns as soon as the signal is triggered instead of waiting out the
/// remaining interval.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the signal and wake every waiter.
    pub fn trigger(&self) {
        *lock(&self.inner.triggered) = true;
        self.inner.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *lock(&self.inner.triggered)
    }

    /// Block for at most `timeout`. Returns `true` if the signal was (or
    /// became) triggered, `false` if the full timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.inner.triggered);
        if *guard || timeout.is_zero() {
            return *guard;
        }

        let (guard, _) = self
            .inner
            .wake
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Owns the single dedicated thread of a poller.
///
/// Dropping a `Worker` stops and joins its thread.
#[derive(Debug)]
pub struct Worker {
    name:     String,
    shutdown: Shutdown,
    started:  AtomicBool,
    handle:   Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:     name.into(),
            shutdown: Shutdown::new(),
            started:  AtomicBool::new(false),
            handle:   Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Caller holds the `handle` lock, so a concurrent `stop()` either sees
    /// the stored handle or triggers shutdown before the claim.
    fn claim_start(&self) -> Result<()> {
        self.ensure_startable()?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Fails if a `spawn` or `retire` would be rejected right now.
    pub fn ensure_startable(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyStarted(self.name.clone()));
        }
        if self.shutdown.is_triggered() {
            return Err(TelemetryError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Spawn the thread running `body`, which receives a clone of the
    /// shutdown signal. Fails once the worker has started, retired or been
    /// stopped.
    pub fn spawn<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(Shutdown) + Send + 'static,
    {
        let mut slot = lock(&self.handle);
        self.claim_start()?;

        let shutdown = self.shutdown.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || body(shutdown));

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                info!("{} started", self.name);
                Ok(())
            }
            Err(source) => {
                self.started.store(false, Ordering::SeqCst);
                Err(TelemetryError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Consume the single start without spawning anything. Used when a
    /// poller has nothing to poll and goes straight to its terminal state.
    pub fn retire(&self) -> Result<()> {
        let _slot = lock(&self.handle);
        self.claim_start()?;
        self.shutdown.trigger();
        Ok(())
    }

    /// Trigger shutdown and join the thread. Safe to call more than once and
    /// from any thread other than the worker itself. A stopped worker can
    /// never be spawned.
    pub fn stop(&self) {
        self.shutdown.trigger();

        let Some(handle) = lock(&self.handle).take() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            debug!("{} asked to join itself; leaving it detached", self.name);
            return;
        }

        match handle.join() {
            Ok(()) => info!("{} stopped", self.name),
            Err(_) => error!("{} thread panicked before shutdown", self.name),
        }
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
