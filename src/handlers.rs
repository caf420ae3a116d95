//! Endpoint handlers.
//!
//! Each registered endpoint is served by a [`Handler`]. The compute handler
//! delegates the actual work to an injected [`Workload`] so the simulated
//! processing time can be swapped for a fixed value.

use crate::stats::Stats;
use chrono::Local;
use rand::Rng;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Boxed future returned by handlers and workloads
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Business logic bound to one endpoint.
pub trait Handler: Send + Sync {
    fn invoke<'a>(&'a self, stats: &'a Stats) -> BoxFuture<'a, Value>;
}

/// Simulated work performed by `/v1/api`.
///
/// Resolves to the duration of the work in whole seconds.
pub trait Workload: Send + Sync {
    fn perform(&self) -> BoxFuture<'_, u64>;
}

/// Sleeps for a uniformly random whole number of seconds.
#[derive(Debug, Clone, Copy)]
pub struct RandomSleep {
    min_seconds: u64,
    max_seconds: u64,
}

impl RandomSleep {
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        RandomSleep {
            min_seconds,
            max_seconds: max_seconds.max(min_seconds),
        }
    }

    fn sample(&self) -> u64 {
        rand::thread_rng().gen_range(self.min_seconds..=self.max_seconds)
    }
}

impl Workload for RandomSleep {
    fn perform(&self) -> BoxFuture<'_, u64> {
        let seconds = self.sample();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            seconds
        })
    }
}

/// Serves `/v1/api`: runs the workload and records it in the totals.
pub struct ComputeHandler {
    workload: Arc<dyn Workload>,
}

impl ComputeHandler {
    pub fn new(workload: Arc<dyn Workload>) -> Self {
        ComputeHandler { workload }
    }
}

impl Handler for ComputeHandler {
    fn invoke<'a>(&'a self, stats: &'a Stats) -> BoxFuture<'a, Value> {
        Box::pin(async move {
            let started = Local::now().naive_local();
            let seconds = self.workload.perform().await;
            stats.record(seconds);
            trace!(seconds, "Compute finished");

            json!({
                "current_date": started.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                "response_took_seconds": seconds,
            })
        })
    }
}

/// Serves `/health`: reports the totals without touching them.
pub struct HealthHandler;

impl Handler for HealthHandler {
    fn invoke<'a>(&'a self, stats: &'a Stats) -> BoxFuture<'a, Value> {
        let totals = stats.snapshot();
        Box::pin(async move { json!({ "total": totals }) })
    }
}

/// Workload that reports a fixed duration without sleeping
#[cfg(test)]
pub struct FixedWork(pub u64);

#[cfg(test)]
impl Workload for FixedWork {
    fn perform(&self) -> BoxFuture<'_, u64> {
        let seconds = self.0;
        Box::pin(async move { seconds })
    }
}
