mod job;
mod state;

pub use job::{InvalidTransition, JobRecord, JobState, SPAWN_FAILURE_EXIT_CODE};
pub use state::{FailurePolicy, PipelineState, StateMachine};
