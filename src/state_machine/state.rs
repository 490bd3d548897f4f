use std::fmt;

use serde::{Deserialize, Serialize};

use crate::definition::Phase;

/// States of a whole run.
///
/// PRE → MAIN → POST → DONE, or PRE → ABORTED → DONE when a PRE item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineState {
    Pre,
    Main,
    Post,
    Done,
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Pre => write!(f, "PRE"),
            PipelineState::Main => write!(f, "MAIN"),
            PipelineState::Post => write!(f, "POST"),
            PipelineState::Done => write!(f, "DONE"),
            PipelineState::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl PipelineState {
    /// Phase whose items run while in this state.
    pub fn phase(self) -> Option<Phase> {
        match self {
            PipelineState::Pre => Some(Phase::Pre),
            PipelineState::Main => Some(Phase::Main),
            PipelineState::Post => Some(Phase::Post),
            PipelineState::Done | PipelineState::Aborted => None,
        }
    }

    pub fn is_final(self) -> bool {
        self == PipelineState::Done
    }
}

/// Per-phase policy: how a failing item affects the rest of the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop dispatching and abort the run (PRE).
    Abort,
    /// Keep going, record the failure (MAIN, POST).
    Continue,
}

impl FailurePolicy {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Pre => FailurePolicy::Abort,
            Phase::Main | Phase::Post => FailurePolicy::Continue,
        }
    }
}

/// Drives the run through its states, keeping the visited history.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Pre,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state left so far, in order.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn was_aborted(&self) -> bool {
        self.state == PipelineState::Aborted || self.history.contains(&PipelineState::Aborted)
    }

    /// Advance after the current phase finished with `failures` FAILED or
    /// TIMED_OUT items.
    ///
    /// - PRE with any failure moves to ABORTED, otherwise to MAIN.
    /// - MAIN always moves to POST, whatever its outcome.
    /// - POST and ABORTED move to DONE.
    /// - DONE stays DONE.
    pub fn next(&mut self, failures: usize) -> PipelineState {
        let next = match self.state {
            PipelineState::Pre if failures > 0 => PipelineState::Aborted,
            PipelineState::Pre => PipelineState::Main,
            PipelineState::Main => PipelineState::Post,
            PipelineState::Post | PipelineState::Aborted => PipelineState::Done,
            PipelineState::Done => return PipelineState::Done,
        };
        self.history.push(self.state);
        self.state = next;
        next
    }
}
