use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definition::{JobDefinition, Phase};

/// Exit code recorded when a job's process could not be spawned at all.
/// Matches the shell's "command not found" status.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Lifecycle of a single job item.
///
/// PENDING → RUNNING → exactly one of SUCCEEDED, FAILED or TIMED_OUT.
/// A spawn failure goes straight from PENDING to FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut
        )
    }

    /// FAILED or TIMED_OUT.
    pub fn is_failure(self) -> bool {
        matches!(self, JobState::Failed | JobState::TimedOut)
    }

    fn can_move_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Running) => true,
            (JobState::Pending, JobState::Failed) => true,
            (JobState::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Succeeded => write!(f, "SUCCEEDED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job `{job}` cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub job: String,
    pub from: JobState,
    pub to: JobState,
}

/// Mutable run-time state of one job item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub phase: Phase,
    pub declared_order: usize,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Unset until the job is terminal.
    pub exit_code: Option<i32>,
    /// OS process id while RUNNING; cleared once terminal.
    #[serde(skip)]
    pub pid: Option<u32>,
    /// Spawn error text, if the process never started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(job: &JobDefinition) -> Self {
        Self {
            name: job.name.clone(),
            phase: job.phase,
            declared_order: job.declared_order,
            state: JobState::Pending,
            started_at: None,
            ended_at: None,
            exit_code: None,
            pid: None,
            error: None,
        }
    }

    pub fn start(&mut self, pid: Option<u32>, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobState::Running)?;
        self.pid = pid;
        self.started_at = Some(at);
        Ok(())
    }

    /// Natural exit: SUCCEEDED for code 0, FAILED otherwise.
    pub fn complete(&mut self, exit_code: i32, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let next = if exit_code == 0 {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        self.transition(next)?;
        self.finish(Some(exit_code), at);
        Ok(())
    }

    pub fn time_out(&mut self, exit_code: Option<i32>, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobState::TimedOut)?;
        self.finish(exit_code, at);
        Ok(())
    }

    pub fn spawn_failed(&mut self, message: String, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobState::Failed)?;
        self.started_at = Some(at);
        self.error = Some(message);
        self.finish(Some(SPAWN_FAILURE_EXIT_CODE), at);
        Ok(())
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }

    fn finish(&mut self, exit_code: Option<i32>, at: DateTime<Utc>) {
        self.exit_code = exit_code;
        self.ended_at = Some(at);
        self.pid = None;
    }

    fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_move_to(next) {
            return Err(InvalidTransition {
                job: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
