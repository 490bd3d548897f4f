//! Wall-time monitor.
//!
//! Keeps `deadline = start + effective wall time` for every RUNNING job and
//! reports the ones that are past it. The orchestrator checks it once per
//! poll interval, so overrun is bounded by that interval.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

/// Deadline table for the RUNNING jobs of one phase.
#[derive(Debug)]
pub struct WallTimeMonitor {
    poll_interval: Duration,
    /// Keyed by the job's declared order within the active phase.
    deadlines: BTreeMap<usize, Deadline>,
}

#[derive(Debug, Clone)]
struct Deadline {
    name: String,
    /// `None` when the wall time is too large to be represented as an instant.
    at: Option<Instant>,
}

impl WallTimeMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            deadlines: BTreeMap::new(),
        }
    }

    /// Start tracking a job that just became RUNNING.
    pub fn track(&mut self, key: usize, name: &str, started: Instant, walltime: Duration) {
        let at = started.checked_add(walltime);
        if at.is_none() {
            debug!(job = name, "wall time out of range, job never expires");
        } else {
            debug!(job = name, walltime_secs = walltime.as_secs_f64(), "tracking deadline");
        }
        self.deadlines.insert(
            key,
            Deadline {
                name: name.to_string(),
                at,
            },
        );
    }

    /// Stop tracking a job that reached a terminal state.
    pub fn release(&mut self, key: usize) {
        self.deadlines.remove(&key);
    }

    /// Keys of tracked jobs whose deadline is at or before `now`, in key order.
    pub fn expired(&self, now: Instant) -> Vec<usize> {
        self.deadlines
            .iter()
            .filter(|(_, d)| d.at.is_some_and(|at| at <= now))
            .map(|(key, d)| {
                debug!(job = %d.name, "deadline passed");
                *key
            })
            .collect()
    }

    /// How long the control loop may sleep: the poll interval, shortened if a
    /// deadline falls inside it.
    pub fn next_wait(&self, now: Instant) -> Duration {
        self.deadlines
            .values()
            .filter_map(|d| d.at)
            .map(|at| at.saturating_duration_since(now))
            .min()
            .map_or(self.poll_interval, |until| until.min(self.poll_interval))
    }
}
