//! Service lifecycle: readiness state, in-flight tracking and the shutdown
//! signal shared with streaming sessions.
//!
//! State lives in an `ArcSwap` so readiness probes never take a lock; the
//! in-flight count is an atomic decremented by RAII guards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// State machine: `Starting -> Ready -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Routes are built but the listener is not serving yet.
    Starting,
    /// Serving traffic.
    Ready,
    /// Shutdown requested; waiting for in-flight requests.
    Draining,
    /// Every in-flight request has finished.
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }
}

/// Shared lifecycle handle.
///
/// 1. readiness checks `state()`
/// 2. every routed request holds an [`InFlightGuard`]
/// 3. `trigger_shutdown()` moves to `Draining` and notifies `shutdown_receiver()`s,
///    which streaming sessions select on
/// 4. `wait_for_drain()` waits for the guards to drop
#[derive(Debug)]
pub struct Lifecycle {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<LifecycleState>,
    started_at: Instant,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(LifecycleState::Starting),
            started_at: Instant::now(),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Time since this handle was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Receiver flipped to `true` once shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining` and wakes every shutdown receiver.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::Draining));
        // No receivers is fine: nothing is streaming.
        let _ = self.shutdown_signal.send(true);
    }

    /// Counts one in-flight request until the guard drops (including on panic).
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits until no request is in flight, polling every 10ms.
    ///
    /// Returns `true` and moves to `Stopped` on success; returns `false` and
    /// stays `Draining` if `timeout` expires first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight_count() == 0 {
                self.state.store(Arc::new(LifecycleState::Stopped));
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
