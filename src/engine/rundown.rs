//! Rundown protection for background work
//!
//! A [`RundownGuard`] counts the asynchronous tasks a component has in flight
//! (checks, state saves, notification deliveries) and lets shutdown wait
//! until every one of them has finished. Once shutdown has begun no new work
//! can be registered.
//!
//! ## State Layout
//!
//! ```text
//!  31   30                                   0
//! ┌───┬──────────────────────────────────────┐
//! │ R │          in-flight counter           │
//! └───┴──────────────────────────────────────┘
//!   R = rundown requested
//! ```
//!
//! The counter and the flag live in a single `AtomicU32` so acquire, release
//! and the rundown request are each a single compare-and-swap.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

const RUNDOWN_ACTIVE: u32 = 0x8000_0000;
const COUNTER_MASK: u32 = !RUNDOWN_ACTIVE;

/// Reference-counted gate that drains in-flight work before teardown.
#[derive(Debug, Default)]
pub struct RundownGuard {
    state: AtomicU32,
    drained: Notify,
}

impl RundownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of in-flight work.
    ///
    /// Returns `false` when rundown has already been requested, in which case
    /// the caller must not start the guarded work.
    pub fn acquire(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & RUNDOWN_ACTIVE != 0 {
                return false;
            }
            debug_assert!(current & COUNTER_MASK < COUNTER_MASK, "rundown counter overflow");
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Unregister one unit of in-flight work previously registered with
    /// [`acquire`](Self::acquire).
    pub fn release(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            debug_assert!(current & COUNTER_MASK != 0, "release without acquire");
            let next = (current & RUNDOWN_ACTIVE) | ((current & COUNTER_MASK).saturating_sub(1));
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if next == RUNDOWN_ACTIVE {
                        self.drained.notify_waiters();
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Request rundown and wait until all in-flight work has been released.
    ///
    /// Calling this more than once is harmless; later callers simply wait for
    /// the same drain.
    pub async fn wait(&self) {
        let drained = self.drained.notified();
        tokio::pin!(drained);
        // register interest before publishing the flag so the last release
        // cannot slip between the check and the await
        drained.as_mut().enable();

        let previous = self.state.fetch_or(RUNDOWN_ACTIVE, Ordering::AcqRel);
        if previous & COUNTER_MASK == 0 {
            return;
        }
        drained.await;
    }

    /// Whether rundown has been requested.
    pub fn is_running_down(&self) -> bool {
        self.state.load(Ordering::Acquire) & RUNDOWN_ACTIVE != 0
    }

    /// Number of units of work currently in flight.
    pub fn in_flight(&self) -> u32 {
        self.state.load(Ordering::Acquire) & COUNTER_MASK
    }

    /// Acquire a token that releases automatically when dropped.
    pub fn enter(self: &Arc<Self>) -> Option<RundownToken> {
        self.acquire().then(|| RundownToken {
            guard: Arc::clone(self),
        })
    }
}

/// Proof of a successful [`RundownGuard::acquire`]; releases on drop.
#[derive(Debug)]
pub struct RundownToken {
    guard: Arc<RundownGuard>,
}

impl Drop for RundownToken {
    fn drop(&mut self) {
        self.guard.release();
    }
}
