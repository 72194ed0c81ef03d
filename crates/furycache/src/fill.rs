//! Per-key fill in progress
//!
//! Created by the first miss on a key and shared (via `Arc`) by every miss
//! that arrives while the fetch is running. Joining happens under the
//! engine's exclusive lock, in the same critical section that found the
//! payload absent, so no caller can slip between "not cached" and "fill
//! registered". The outcome is published once and never cleared, so a
//! waiter that checks late still sees it.
//!
//! A fill is published only by whoever removes it from the engine's fill map,
//! under the exclusive lock: the fetch thread on completion, or a waiter whose
//! deadline passed first. A fill still in the map is therefore unpublished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::error::Result;

pub(crate) struct Fill {
    started: Instant,
    waiters: AtomicUsize,
    outcome: Mutex<Option<Result<Bytes>>>,
    ready: Condvar,
}

impl Fill {
    /// New fill with its creator as the only waiter
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            waiters: AtomicUsize::new(1),
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// When the fill was registered; waiter deadlines count from here
    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    /// Register one more waiter
    pub(crate) fn join(&self) {
        self.waiters.fetch_add(1, Ordering::Relaxed);
    }

    /// Deregister a waiter that has its outcome
    pub(crate) fn leave(&self) {
        self.waiters.fetch_sub(1, Ordering::Relaxed);
    }

    /// Callers still waiting on this fill
    pub(crate) fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    /// Publish the fetch outcome and wake every waiter
    ///
    /// Returns false, leaving the first outcome in place, if one was
    /// already published.
    pub(crate) fn publish(&self, outcome: Result<Bytes>) -> bool {
        let mut slot = self.outcome.lock();
        let first = slot.is_none();
        if first {
            *slot = Some(outcome);
        }
        self.ready.notify_all();
        first
    }

    /// Published outcome, if any
    pub(crate) fn outcome(&self) -> Option<Result<Bytes>> {
        self.outcome.lock().clone()
    }

    /// Block until an outcome is published or `deadline` passes
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<Result<Bytes>> {
        let mut slot = self.outcome.lock();

        while slot.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }

        slot.clone()
    }
}
