//! Command line interface.

use std::path::PathBuf;

use clap::Parser;

/// Run a YAML-described set of shell jobs in pre, main and post phases,
/// with bounded parallelism and per-job wall-time limits.
#[derive(Debug, Parser)]
#[command(name = "job-executor", version, about)]
pub struct Cli {
    /// YAML job items file.
    #[arg(long = "jobs", value_name = "FILE")]
    pub jobs_file: PathBuf,

    /// Runner settings file (defaults to ./job-executor.toml when present).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Validate the job file and print the dispatch plan without running anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Print the final report as JSON on stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable debug logging.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}
