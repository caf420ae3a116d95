//! Admission control for new connections.
//!
//! The listener compares the live worker count against the configured
//! ceiling at accept time. The count includes the accept loop itself, and a
//! connection is rejected only once that count is strictly greater than the
//! ceiling, so a ceiling of `N` admits at most `N` concurrent sessions.
//!
//! Sessions register themselves once their task is running, so connections
//! accepted back to back can all pass the check before any of them is
//! counted. Strict admission registers the slot before spawning instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Result of the admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject,
}

/// Reject only when the running workers already exceed the limit.
pub fn decide(active_workers: usize, limit: usize) -> Decision {
    if active_workers > limit {
        Decision::Reject
    } else {
        Decision::Admit
    }
}

/// Live count of running workers.
#[derive(Debug, Clone, Default)]
pub struct WorkerTracker {
    active: Arc<AtomicUsize>,
}

impl WorkerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running worker. The slot is released when the guard drops.
    pub fn register(&self) -> WorkerGuard {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(active, "Worker registered");
        WorkerGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Check the live count against `limit`
    pub fn decide(&self, limit: usize) -> Decision {
        decide(self.active(), limit)
    }
}

/// Slot held by a running worker
#[derive(Debug)]
pub struct WorkerGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let active = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!(active, "Worker released");
    }
}
