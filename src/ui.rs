//! Terminal output: per-job status lines, a MAIN-phase progress bar and the
//! final report table.
//!
//! Status lines go to stderr so stdout stays clean for `--json`.

use std::cell::RefCell;

use chrono::{DateTime, Local, Utc};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::definition::{JobDefinition, JobSet, Phase};
use crate::orchestrator::ProgressReporter;
use crate::report::{PhaseReport, Report, RunStatus};
use crate::scheduler::Scheduler;
use crate::state_machine::{JobRecord, JobState};

/// Prints job status lines to stderr and shows a progress bar while MAIN runs.
pub struct ConsoleReporter {
    /// Present only during the MAIN phase.
    bar: RefCell<Option<ProgressBar>>,
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
    dim: Style,
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            bar: RefCell::new(None),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow().bold(),
            cyan: Style::new().cyan(),
            dim: Style::new().dim(),
        }
    }

    fn state_style(&self, state: JobState) -> &Style {
        match state {
            JobState::Succeeded => &self.green,
            JobState::Failed => &self.red,
            JobState::TimedOut => &self.yellow,
            JobState::Pending | JobState::Running => &self.dim,
        }
    }

    // Print above the bar when one is active.
    fn line(&self, text: String) {
        match self.bar.borrow().as_ref() {
            Some(bar) => bar.suspend(|| eprintln!("{text}")),
            None => eprintln!("{text}"),
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn phase_started(&self, phase: Phase, jobs: usize) {
        eprintln!();
        eprintln!("{}", self.cyan.apply_to(format!("{} Job Items ({jobs}):", phase_title(phase))));
        if phase != Phase::Main || jobs == 0 {
            return;
        }
        let bar = ProgressBar::new(jobs as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        *self.bar.borrow_mut() = Some(bar);
    }

    fn job_started(&self, job: &JobDefinition) {
        self.line(format!(
            "[{}] {{job_state: {}, job: {}, command: {}}}",
            timestamp(Utc::now()),
            self.cyan.apply_to("EXECUTING"),
            job.name,
            job.command
        ));
    }

    fn job_finished(&self, record: &JobRecord) {
        let run_time = record
            .duration()
            .map(|d| format_run_time(d.num_milliseconds()))
            .unwrap_or_else(|| "--:--:--".into());
        let exit_code = record
            .exit_code
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        self.line(format!(
            "[{}] {{job_state: {}, job: {}, exit_code: {exit_code}, run_time: {run_time}}}",
            timestamp(record.ended_at.unwrap_or_else(Utc::now)),
            self.state_style(record.state).apply_to(format!("{:<9}", record.state)),
            record.name,
        ));
        if let Some(error) = &record.error {
            self.line(format!("    {}", self.red.apply_to(error)));
        }
        if let Some(bar) = self.bar.borrow().as_ref() {
            bar.inc(1);
        }
    }

    fn phase_finished(&self, _phase: Phase, _failures: usize) {
        if let Some(bar) = self.bar.borrow_mut().take() {
            bar.finish_and_clear();
        }
    }
}

/// Print the per-phase results table and the overall status.
pub fn print_report(report: &Report) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow().bold();
    let dim = Style::new().dim();

    println!();
    println!("{}", Style::new().bold().apply_to("─── Run Report ───"));
    for phase in &report.phases {
        print_phase(phase, &green, &red, &yellow, &dim);
    }

    let status_style = match report.status {
        RunStatus::Success => &green,
        RunStatus::CompletedWithFailures => &yellow,
        RunStatus::Aborted | RunStatus::InvalidJobFile => &red,
    };
    println!();
    println!(
        "Status: {} (exit code {}, {} job(s) failed or timed out)",
        status_style.apply_to(report.status),
        report.exit_code(),
        report.total_failures()
    );
}

fn print_phase(phase: &PhaseReport, green: &Style, red: &Style, yellow: &Style, dim: &Style) {
    println!();
    println!(
        "{}: {} succeeded, {} failed, {} timed out, {} skipped",
        phase_title(phase.phase),
        phase.succeeded,
        phase.failed,
        phase.timed_out,
        phase.skipped
    );
    let width = phase.jobs.iter().map(|j| j.name.len()).max().unwrap_or(0).max(4);
    for job in &phase.jobs {
        let (label, style) = match job.state {
            JobState::Succeeded => ("SUCCEEDED", green),
            JobState::Failed => ("FAILED", red),
            JobState::TimedOut => ("TIMED_OUT", yellow),
            JobState::Pending | JobState::Running => ("SKIPPED", dim),
        };
        let exit_code = job.exit_code.map_or_else(|| "-".to_string(), |c| c.to_string());
        let run_time = job
            .duration_ms
            .map_or_else(|| "--:--:--".to_string(), format_run_time);
        println!(
            "  {:<width$}  {}  {:>4}  {run_time}",
            job.name,
            style.apply_to(format!("{label:<9}")),
            exit_code,
        );
    }
}

/// Print the dispatch plan of every phase without running anything.
pub fn print_plan(jobs: &JobSet) {
    let global = &jobs.global;
    println!(
        "threads: {}, strategy: {}, wall_time: {}s, priority: {}",
        global.threads,
        global.strategy,
        global.default_walltime.as_secs(),
        global.default_priority
    );
    for phase in [Phase::Pre, Phase::Main, Phase::Post] {
        let scheduler = match phase {
            Phase::Main => Scheduler::new(*global),
            Phase::Pre | Phase::Post => Scheduler::sequential(*global),
        };
        println!();
        println!("{} Job Items:", phase_title(phase));
        for (position, job) in scheduler.plan(jobs.items(phase)).into_iter().enumerate() {
            let job = job.resolved(global);
            println!(
                "  {:>2}. {} (wall_time: {}s{}) {}",
                position + 1,
                job.name,
                job.effective_walltime(global).as_secs(),
                if phase == Phase::Main {
                    format!(", priority: {}", job.effective_priority(global))
                } else {
                    String::new()
                },
                Style::new().dim().apply_to(&job.command)
            );
        }
    }
}

fn phase_title(phase: Phase) -> &'static str {
    match phase {
        Phase::Pre => "Pre",
        Phase::Main => "Main",
        Phase::Post => "Post",
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

/// `HH:MM:SS` from milliseconds, truncating sub-second parts.
pub fn format_run_time(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
