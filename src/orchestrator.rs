use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::definition::{JobDefinition, JobSet, Phase};
use crate::error::ExecutorError;
use crate::monitor::WallTimeMonitor;
use crate::pool::{Dispatch, ExecutionPool};
use crate::report::{Report, ResultCollector};
use crate::scheduler::Scheduler;
use crate::state_machine::{FailurePolicy, JobRecord, PipelineState, StateMachine};

/// Observer of run progress. Every method defaults to doing nothing.
pub trait ProgressReporter {
    fn phase_started(&self, _phase: Phase, _jobs: usize) {}
    fn job_started(&self, _job: &JobDefinition) {}
    fn job_finished(&self, _record: &JobRecord) {}
    fn phase_finished(&self, _phase: Phase, _failures: usize) {}
}

/// Reporter that discards every event.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Runs the PRE, MAIN and POST phases of a job set to completion.
pub struct PhaseOrchestrator<R: ProgressReporter> {
    jobs: JobSet,
    config: RunnerConfig,
    reporter: R,
}

impl<R: ProgressReporter> PhaseOrchestrator<R> {
    /// Create an orchestrator for a validated job set.
    pub fn new(jobs: JobSet, config: RunnerConfig, reporter: R) -> Self {
        Self {
            jobs,
            config,
            reporter,
        }
    }

    /// Walk the state machine until DONE and return the final report.
    pub async fn run(&self) -> Result<Report, ExecutorError> {
        let mut machine = StateMachine::new();
        let mut collector = ResultCollector::new();

        while !machine.state().is_final() {
            let state = machine.state();
            let failures = match state.phase() {
                Some(phase) => self.run_phase(phase, &mut collector).await?,
                None => {
                    // ABORTED: MAIN and POST are reported but never dispatched.
                    for phase in [Phase::Main, Phase::Post] {
                        collector.begin_phase(phase, self.jobs.items(phase));
                    }
                    0
                }
            };
            let next = machine.next(failures);
            if next == PipelineState::Aborted {
                warn!(failures, "PRE phase failed, skipping MAIN and POST");
            }
            info!(from = %state, to = %next, "pipeline transition");
        }

        let mut states = machine.history().to_vec();
        states.push(machine.state());
        Ok(collector.finish(states, machine.was_aborted()))
    }

    /// Run every item of `phase` and return its FAILED + TIMED_OUT count.
    async fn run_phase(&self, phase: Phase, collector: &mut ResultCollector) -> Result<usize, ExecutorError> {
        let global = self.jobs.global;
        let items = self.jobs.items(phase);
        collector.begin_phase(phase, items);
        self.reporter.phase_started(phase, items.len());

        let (slots, scheduler) = match phase {
            Phase::Main => (global.threads, Scheduler::new(global)),
            Phase::Pre | Phase::Post => (1, Scheduler::sequential(global)),
        };
        let policy = FailurePolicy::for_phase(phase);
        info!(%phase, jobs = items.len(), slots, strategy = %scheduler.strategy(), "phase started");

        let mut pending = items.to_vec();
        let mut pool = ExecutionPool::new(slots, &self.config);
        let mut monitor = WallTimeMonitor::new(self.config.poll_interval());
        let mut halted = false;

        loop {
            let mut progressed = false;

            while !halted && pool.has_free_slot() {
                let Some(job) = scheduler.select_next(&mut pending) else {
                    break;
                };
                collector.note_dispatch(phase, &job.name);
                self.reporter.job_started(&job);
                match pool.dispatch(&job)? {
                    Dispatch::Running { key, started } => {
                        monitor.track(key, &job.name, started, job.effective_walltime(&global));
                    }
                    Dispatch::SpawnFailed(record) => {
                        halted |= self.settle(record, policy, collector);
                    }
                }
                progressed = true;
            }

            for record in pool.poll_completions()? {
                monitor.release(record.declared_order);
                halted |= self.settle(record, policy, collector);
                progressed = true;
            }

            // Expired jobs get SIGTERM here and come back through
            // poll_completions as TIMED_OUT once their group is gone.
            for key in monitor.expired(Instant::now()) {
                monitor.release(key);
                progressed |= pool.begin_terminate(key);
            }

            if pool.is_idle() && (halted || pending.is_empty()) {
                break;
            }
            if !progressed {
                let now = Instant::now();
                let wait = monitor.next_wait(now);
                let wait = pool.next_escalation(now).map_or(wait, |kill| kill.min(wait));
                tokio::time::sleep(wait).await;
            }
        }

        if halted && !pending.is_empty() {
            debug!(%phase, skipped = pending.len(), "items left undispatched");
        }
        collector.note_peak(phase, pool.peak_running());
        let failures = collector.failures(phase);
        self.reporter.phase_finished(phase, failures);
        info!(%phase, failures, "phase finished");
        Ok(failures)
    }

    /// Hand a terminal record to the collector. Returns true when the phase
    /// must stop dispatching.
    fn settle(&self, record: JobRecord, policy: FailurePolicy, collector: &mut ResultCollector) -> bool {
        self.reporter.job_finished(&record);
        let failed = record.state.is_failure();
        if failed {
            warn!(
                job = %record.name,
                state = %record.state,
                exit_code = record.exit_code,
                "job did not succeed"
            );
        }
        collector.record(record);
        failed && policy == FailurePolicy::Abort
    }
}
