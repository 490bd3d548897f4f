//! Parallel job executor.
//!
//! Runs a YAML-declared set of shell commands in three phases: a sequential
//! PRE phase, a MAIN phase under bounded parallelism and a pluggable
//! dispatch [`Strategy`](definition::Strategy), and a sequential POST phase.
//! Every job has a wall-time limit; a job that exceeds it is terminated
//! together with all of its descendant processes.

pub mod cli;
pub mod config;
pub mod definition;
pub mod error;
pub mod loader;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod state_machine;
pub mod ui;
