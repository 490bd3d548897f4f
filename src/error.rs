use thiserror::Error;

use crate::definition::Phase;
use crate::state_machine::InvalidTransition;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid job file: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No free slot to dispatch job `{0}`")]
    NoFreeSlot(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Problems found while turning a job file into definitions.
/// All of them are fatal: no phase runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{phase} item #{index}: required field `{field}` is missing or empty")]
    MissingField {
        phase: Phase,
        index: usize,
        field: &'static str,
    },

    #[error("duplicate job name `{name}` in {phase} items")]
    DuplicateJob { phase: Phase, name: String },

    #[error("invalid duration `{0}` (expected seconds or HH:MM:SS)")]
    InvalidDuration(String),

    #[error("global threads must be at least 1, got {0}")]
    InvalidThreads(i64),

    #[error("wall time of `{0}` resolves to zero seconds")]
    ZeroWallTime(String),

    #[error("unknown strategy `{0}` (expected priority, wall_time or sequential)")]
    UnknownStrategy(String),
}

impl ExecutorError {
    /// Whether this error belongs to the "could not load the job set" category.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            ExecutorError::Validation(_)
                | ExecutorError::Yaml(_)
                | ExecutorError::Io(_)
                | ExecutorError::Config(_)
                | ExecutorError::Toml(_)
        )
    }
}
