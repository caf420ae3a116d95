//! Process-wide request statistics.
//!
//! The totals are mutated by every session that serves `/v1/api` and read by
//! `/health`. Both fields live behind one lock so a reader never observes a
//! query counted without its seconds.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Snapshot of the cumulative totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    /// Completed compute requests
    pub queries: u64,
    /// Sum of simulated processing durations, in seconds
    pub seconds: u64,
}

/// Thread-safe statistics counter
#[derive(Debug, Default)]
pub struct Stats {
    totals: RwLock<Totals>,
}

impl Stats {
    /// Create a zeroed counter ready to be shared between sessions
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one completed compute request that took `seconds`.
    pub fn record(&self, seconds: u64) {
        let mut totals = match self.totals.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        totals.queries = totals.queries.saturating_add(1);
        totals.seconds = totals.seconds.saturating_add(seconds);
        trace!(queries = totals.queries, seconds = totals.seconds, "Recorded query");
    }

    /// Read a consistent copy of the totals
    pub fn snapshot(&self) -> Totals {
        match self.totals.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
