//! Loads the YAML job file into a validated [`JobSet`].
//!
//! Layout of the file:
//!
//! ```yaml
//! global:
//!   threads: 4
//!   wall_time: "01:00:00"
//!   strategy: priority
//!   priority: 100
//! pre_job_items:
//!   - job: setup
//!     command: ./setup.sh
//! job_items:
//!   - job: test_a
//!     command: ./run.sh a
//!     priority: 105
//! post_job_items:
//!   - job: teardown
//!     command: ./teardown.sh
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::definition::{
    default_stderr, default_stdout, GlobalConfig, JobDefinition, JobSet, Phase, Strategy,
    DEFAULT_PRIORITY, DEFAULT_THREADS, DEFAULT_WALLTIME_SECS,
};
use crate::error::{ExecutorError, ValidationError};

#[derive(Debug, Default, Deserialize)]
struct RawJobFile {
    #[serde(default)]
    global: Option<RawGlobal>,
    #[serde(default)]
    pre_job_items: Option<Vec<RawSerialItem>>,
    #[serde(default)]
    job_items: Option<Vec<RawMainItem>>,
    #[serde(default)]
    post_job_items: Option<Vec<RawSerialItem>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGlobal {
    threads: Option<i64>,
    wall_time: Option<RawDuration>,
    strategy: Option<String>,
    priority: Option<i64>,
}

// Pre and post items have no priority.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSerialItem {
    job: Option<String>,
    command: Option<String>,
    wall_time: Option<RawDuration>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMainItem {
    job: Option<String>,
    command: Option<String>,
    wall_time: Option<RawDuration>,
    priority: Option<i64>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
}

impl From<RawSerialItem> for RawMainItem {
    fn from(item: RawSerialItem) -> Self {
        Self {
            job: item.job,
            command: item.command,
            wall_time: item.wall_time,
            priority: None,
            stdout: item.stdout,
            stderr: item.stderr,
        }
    }
}

/// A wall time as written in the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

/// Read and validate a job file from disk.
pub fn load_file(path: &Path) -> Result<JobSet, ExecutorError> {
    let contents = std::fs::read_to_string(path)?;
    parse_str(&contents)
}

/// Parse and validate a job file already held in memory.
pub fn parse_str(contents: &str) -> Result<JobSet, ExecutorError> {
    // An empty document deserializes to `None`.
    let raw: Option<RawJobFile> = serde_yaml::from_str(contents)?;
    let raw = raw.unwrap_or_default();

    let global = resolve_global(raw.global.unwrap_or_default())?;

    let pre = build_phase(
        Phase::Pre,
        raw.pre_job_items
            .unwrap_or_default()
            .into_iter()
            .map(RawMainItem::from)
            .collect(),
    )?;
    let main = build_phase(Phase::Main, raw.job_items.unwrap_or_default())?;
    let post = build_phase(
        Phase::Post,
        raw.post_job_items
            .unwrap_or_default()
            .into_iter()
            .map(RawMainItem::from)
            .collect(),
    )?;

    Ok(JobSet {
        global,
        pre,
        main,
        post,
    })
}

fn resolve_global(raw: RawGlobal) -> Result<GlobalConfig, ValidationError> {
    let threads = match raw.threads {
        Some(n) if n < 1 => return Err(ValidationError::InvalidThreads(n)),
        Some(n) => n as usize,
        None => DEFAULT_THREADS,
    };

    let default_walltime = match &raw.wall_time {
        Some(value) => parse_duration(value)?,
        None => Duration::from_secs(DEFAULT_WALLTIME_SECS),
    };
    if default_walltime.is_zero() {
        return Err(ValidationError::ZeroWallTime("global".into()));
    }

    let strategy = match raw.strategy {
        Some(s) => Strategy::parse(&s).ok_or(ValidationError::UnknownStrategy(s))?,
        None => Strategy::default(),
    };

    Ok(GlobalConfig {
        threads,
        default_walltime,
        strategy,
        default_priority: raw.priority.unwrap_or(DEFAULT_PRIORITY),
    })
}

fn build_phase(phase: Phase, items: Vec<RawMainItem>) -> Result<Vec<JobDefinition>, ValidationError> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let name = required(item.job, phase, index, "job")?;
        let command = required(item.command, phase, index, "command")?;

        if !seen.insert(name.clone()) {
            return Err(ValidationError::DuplicateJob { phase, name });
        }

        let walltime = match &item.wall_time {
            Some(value) => {
                let walltime = parse_duration(value)?;
                if walltime.is_zero() {
                    return Err(ValidationError::ZeroWallTime(name));
                }
                Some(walltime)
            }
            None => None,
        };

        jobs.push(JobDefinition {
            stdout_path: item.stdout.unwrap_or_else(|| default_stdout(&name)),
            stderr_path: item.stderr.unwrap_or_else(|| default_stderr(&name)),
            name,
            command,
            phase,
            declared_order: index,
            walltime,
            priority: item.priority,
        });
    }

    Ok(jobs)
}

fn required(
    value: Option<String>,
    phase: Phase,
    index: usize,
    field: &'static str,
) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField {
            phase,
            index,
            field,
        }),
    }
}

/// Convert a wall time value into a [`Duration`].
///
/// Integers are seconds, floats are truncated toward zero, strings are
/// either plain seconds or `HH:MM:SS`.
pub fn parse_duration(value: &RawDuration) -> Result<Duration, ValidationError> {
    match value {
        RawDuration::Seconds(secs) => u64::try_from(*secs)
            .map(Duration::from_secs)
            .map_err(|_| ValidationError::InvalidDuration(secs.to_string())),
        RawDuration::Fractional(secs) => {
            if secs.is_finite() && *secs >= 0.0 {
                Ok(Duration::from_secs(secs.trunc() as u64))
            } else {
                Err(ValidationError::InvalidDuration(secs.to_string()))
            }
        }
        RawDuration::Text(text) => parse_duration_str(text).map(Duration::from_secs),
    }
}

/// Parse `HH:MM:SS` (or plain digits) into whole seconds.
pub fn parse_duration_str(text: &str) -> Result<u64, ValidationError> {
    let invalid = || ValidationError::InvalidDuration(text.to_string());
    let trimmed = text.trim();

    let field = |part: &str| -> Result<u64, ValidationError> {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        part.parse::<u64>().map_err(|_| invalid())
    };

    let parts: Vec<&str> = trimmed.split(':').collect();
    match parts.as_slice() {
        [secs] => field(secs),
        [h, m, s] => {
            let (h, m, s) = (field(h)?, field(m)?, field(s)?);
            h.checked_mul(3600)
                .and_then(|v| v.checked_add(m.checked_mul(60)?))
                .and_then(|v| v.checked_add(s))
                .ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}
