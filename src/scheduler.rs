use std::cmp::Ordering;

use crate::definition::{GlobalConfig, JobDefinition, Strategy};

/// Picks the next PENDING job to fill a free slot.
///
/// Selection is deterministic: every strategy falls back to the lowest
/// `declared_order` on ties, and `declared_order` is unique within a phase.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    strategy: Strategy,
    global: GlobalConfig,
}

impl Scheduler {
    /// Scheduler for MAIN, using the job file's strategy.
    pub fn new(global: GlobalConfig) -> Self {
        Self {
            strategy: global.strategy,
            global,
        }
    }

    /// Scheduler used by PRE and POST, which always run in declared order.
    pub fn sequential(global: GlobalConfig) -> Self {
        Self {
            strategy: Strategy::Sequential,
            global,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// `Less` means `a` is dispatched before `b`.
    pub fn compare(&self, a: &JobDefinition, b: &JobDefinition) -> Ordering {
        let primary = match self.strategy {
            Strategy::Priority => b
                .effective_priority(&self.global)
                .cmp(&a.effective_priority(&self.global)),
            Strategy::WallTime => b
                .effective_walltime(&self.global)
                .cmp(&a.effective_walltime(&self.global)),
            Strategy::Sequential => Ordering::Equal,
        };
        primary.then_with(|| a.declared_order.cmp(&b.declared_order))
    }

    /// Remove and return the job to dispatch next, or `None` if nothing is pending.
    pub fn select_next(&self, pending: &mut Vec<JobDefinition>) -> Option<JobDefinition> {
        let index = pending
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| self.compare(a, b))
            .map(|(i, _)| i)?;
        Some(pending.remove(index))
    }

    /// Full dispatch order for a static job set.
    pub fn plan<'a>(&self, jobs: &'a [JobDefinition]) -> Vec<&'a JobDefinition> {
        let mut ordered: Vec<&JobDefinition> = jobs.iter().collect();
        ordered.sort_by(|a, b| self.compare(a, b));
        ordered
    }
}
