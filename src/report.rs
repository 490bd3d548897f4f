//! Result collection and the final run report.
//!
//! The [`ResultCollector`] receives every terminal [`JobRecord`] and turns
//! them into a [`Report`] with per-phase counts and an overall [`RunStatus`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::definition::{JobDefinition, Phase};
use crate::error::ExecutorError;
use crate::state_machine::{JobRecord, JobState, PipelineState};

/// Coarse outcome of a run, mapped one-to-one onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    CompletedWithFailures,
    /// The job file could not be loaded; no phase ran.
    InvalidJobFile,
    /// A PRE item failed; MAIN and POST never ran.
    Aborted,
}

impl RunStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::CompletedWithFailures => 1,
            RunStatus::InvalidJobFile => 2,
            RunStatus::Aborted => 3,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::CompletedWithFailures => write!(f, "COMPLETED WITH FAILURES"),
            RunStatus::InvalidJobFile => write!(f, "INVALID JOB FILE"),
            RunStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Outcome of one job as it appears in the report.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub declared_order: usize,
    /// PENDING here means the job was never dispatched.
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSummary {
    fn pending(job: &JobDefinition) -> Self {
        Self {
            name: job.name.clone(),
            declared_order: job.declared_order,
            state: JobState::Pending,
            exit_code: None,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            error: None,
        }
    }

    fn from_record(record: JobRecord) -> Self {
        Self {
            duration_ms: record.duration().map(|d| d.num_milliseconds()),
            name: record.name,
            declared_order: record.declared_order,
            state: record.state,
            exit_code: record.exit_code,
            started_at: record.started_at,
            ended_at: record.ended_at,
            error: record.error,
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.state == JobState::Pending
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    /// In declared order.
    pub jobs: Vec<JobSummary>,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    /// Job names in the order they were handed to the pool.
    pub dispatch_order: Vec<String>,
    pub peak_running: usize,
}

impl PhaseReport {
    fn new(phase: Phase, jobs: &[JobDefinition]) -> Self {
        let mut jobs: Vec<JobSummary> = jobs.iter().map(JobSummary::pending).collect();
        jobs.sort_by_key(|j| j.declared_order);
        Self {
            phase,
            jobs,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            skipped: 0,
            dispatch_order: Vec::new(),
            peak_running: 0,
        }
    }

    fn recount(&mut self) {
        let jobs = &self.jobs;
        let count = |state: JobState| jobs.iter().filter(|j| j.state == state).count();
        let counts = (
            count(JobState::Succeeded),
            count(JobState::Failed),
            count(JobState::TimedOut),
            count(JobState::Pending),
        );
        (self.succeeded, self.failed, self.timed_out, self.skipped) = counts;
    }

    pub fn failures(&self) -> usize {
        self.failed + self.timed_out
    }

    pub fn job(&self, name: &str) -> Option<&JobSummary> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub status: RunStatus,
    pub states: Vec<PipelineState>,
    pub phases: Vec<PhaseReport>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Report {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    pub fn total_failures(&self) -> usize {
        self.phases.iter().map(PhaseReport::failures).sum()
    }

    /// Pretty-printed JSON for `--json`.
    pub fn to_json(&self) -> Result<String, ExecutorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Accumulates job outcomes phase by phase.
#[derive(Debug)]
pub struct ResultCollector {
    phases: Vec<PhaseReport>,
    started_at: DateTime<Utc>,
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCollector {
    pub fn new() -> Self {
        Self {
            phases: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Register the jobs of a phase; all start out PENDING.
    pub fn begin_phase(&mut self, phase: Phase, jobs: &[JobDefinition]) {
        if self.phase_mut(phase).is_none() {
            let mut report = PhaseReport::new(phase, jobs);
            report.recount();
            self.phases.push(report);
        }
    }

    pub fn note_dispatch(&mut self, phase: Phase, name: &str) {
        if let Some(report) = self.phase_mut(phase) {
            report.dispatch_order.push(name.to_string());
        }
    }

    pub fn note_peak(&mut self, phase: Phase, peak: usize) {
        if let Some(report) = self.phase_mut(phase) {
            report.peak_running = report.peak_running.max(peak);
        }
    }

    /// Store a terminal record. Non-terminal records are ignored.
    pub fn record(&mut self, record: JobRecord) {
        if !record.state.is_terminal() {
            return;
        }
        let Some(report) = self.phase_mut(record.phase) else {
            return;
        };
        let summary = JobSummary::from_record(record);
        match report
            .jobs
            .iter_mut()
            .find(|j| j.declared_order == summary.declared_order)
        {
            Some(slot) => *slot = summary,
            None => report.jobs.push(summary),
        }
        report.recount();
    }

    /// FAILED plus TIMED_OUT jobs recorded so far in `phase`.
    pub fn failures(&self, phase: Phase) -> usize {
        self.phases
            .iter()
            .find(|p| p.phase == phase)
            .map_or(0, PhaseReport::failures)
    }

    pub fn finish(mut self, states: Vec<PipelineState>, aborted: bool) -> Report {
        self.phases.sort_by_key(|p| p.phase);
        let status = if aborted {
            RunStatus::Aborted
        } else if self.phases.iter().any(|p| p.failures() > 0) {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Success
        };
        Report {
            status,
            states,
            phases: self.phases,
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> Option<&mut PhaseReport> {
        self.phases.iter_mut().find(|p| p.phase == phase)
    }
}
