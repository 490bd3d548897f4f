use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use job_executor::cli::Cli;
use job_executor::config::RunnerConfig;
use job_executor::error::ExecutorError;
use job_executor::loader;
use job_executor::orchestrator::PhaseOrchestrator;
use job_executor::report::RunStatus;
use job_executor::ui::{self, ConsoleReporter};

// Conventional status for termination by Ctrl-C.
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            let load_failure = e
                .downcast_ref::<ExecutorError>()
                .is_some_and(ExecutorError::is_load_failure);
            if load_failure {
                ExitCode::from(RunStatus::InvalidJobFile.exit_code())
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = match &cli.config {
        Some(path) => RunnerConfig::load_from(path, true),
        None => RunnerConfig::load(),
    }
    .context("failed to load runner settings")?;

    let jobs = loader::load_file(&cli.jobs_file)
        .with_context(|| format!("failed to load jobs file {}", cli.jobs_file.display()))?;
    if jobs.is_empty() {
        warn!("job file defines no job items");
    }
    info!(
        total = jobs.len(),
        pre = jobs.pre.len(),
        main = jobs.main.len(),
        post = jobs.post.len(),
        threads = jobs.global.threads,
        strategy = %jobs.global.strategy,
        "job file loaded"
    );

    if cli.dry_run {
        ui::print_plan(&jobs);
        return Ok(0);
    }

    let orchestrator = PhaseOrchestrator::new(jobs, config, ConsoleReporter::new());
    let report = tokio::select! {
        report = orchestrator.run() => report?,
        _ = tokio::signal::ctrl_c() => {
            // Dropping the run kills every process group still in the pool.
            eprintln!("\nBreak Requested ... exiting");
            return Ok(INTERRUPTED_EXIT_CODE);
        }
    };

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        ui::print_report(&report);
    }
    Ok(report.exit_code())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
