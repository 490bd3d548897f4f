//! Job definition model.
//!
//! A [`JobDefinition`] is the validated, immutable description of one job
//! item. Optional fields fall back to the run-wide [`GlobalConfig`] through
//! [`JobDefinition::effective_walltime`] and
//! [`JobDefinition::effective_priority`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of MAIN items run in parallel.
pub const DEFAULT_THREADS: usize = 4;
/// Default wall time of a job item (one day).
pub const DEFAULT_WALLTIME_SECS: u64 = 86_400;
/// Default priority used by the priority strategy.
pub const DEFAULT_PRIORITY: i64 = 100;

/// The three phases of a run. PRE and POST run one item at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Pre,
    Main,
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => write!(f, "PRE"),
            Phase::Main => write!(f, "MAIN"),
            Phase::Post => write!(f, "POST"),
        }
    }
}

/// Policy used to pick which PENDING MAIN job fills a freed slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Highest priority first.
    #[default]
    Priority,
    /// Longest wall time first.
    WallTime,
    /// Declaration order.
    Sequential,
}

impl Strategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "priority" => Some(Strategy::Priority),
            "wall_time" => Some(Strategy::WallTime),
            "sequential" => Some(Strategy::Sequential),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Priority => write!(f, "priority"),
            Strategy::WallTime => write!(f, "wall_time"),
            Strategy::Sequential => write!(f, "sequential"),
        }
    }
}

/// Run-wide settings from the `global` section. Read-only after load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalConfig {
    pub threads: usize,
    pub default_walltime: Duration,
    pub strategy: Strategy,
    pub default_priority: i64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            default_walltime: Duration::from_secs(DEFAULT_WALLTIME_SECS),
            strategy: Strategy::default(),
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

/// One job item: a named shell command plus its limits and output targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDefinition {
    pub name: String,
    pub command: String,
    pub phase: Phase,
    /// Position in the phase's list, starting at 0.
    pub declared_order: usize,
    pub walltime: Option<Duration>,
    /// Only meaningful for MAIN items under the priority strategy.
    pub priority: Option<i64>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl JobDefinition {
    /// Build a definition with default output paths and no overrides.
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        phase: Phase,
        declared_order: usize,
    ) -> Self {
        let name = name.into();
        Self {
            stdout_path: default_stdout(&name),
            stderr_path: default_stderr(&name),
            name,
            command: command.into(),
            phase,
            declared_order,
            walltime: None,
            priority: None,
        }
    }

    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.walltime = Some(walltime);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_output(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout_path = stdout.into();
        self.stderr_path = stderr.into();
        self
    }

    pub fn effective_walltime(&self, global: &GlobalConfig) -> Duration {
        self.walltime.unwrap_or(global.default_walltime)
    }

    pub fn effective_priority(&self, global: &GlobalConfig) -> i64 {
        self.priority.unwrap_or(global.default_priority)
    }

    /// Copy with every optional field replaced by its effective value.
    pub fn resolved(&self, global: &GlobalConfig) -> Self {
        Self {
            walltime: Some(self.effective_walltime(global)),
            priority: Some(self.effective_priority(global)),
            ..self.clone()
        }
    }
}

/// Every validated definition of a run, grouped by phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSet {
    pub global: GlobalConfig,
    pub pre: Vec<JobDefinition>,
    pub main: Vec<JobDefinition>,
    pub post: Vec<JobDefinition>,
}

impl JobSet {
    pub fn items(&self, phase: Phase) -> &[JobDefinition] {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Main => &self.main,
            Phase::Post => &self.post,
        }
    }

    pub fn len(&self) -> usize {
        self.pre.len() + self.main.len() + self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn default_stdout(name: &str) -> PathBuf {
    PathBuf::from(format!("./{name}.out"))
}

pub fn default_stderr(name: &str) -> PathBuf {
    PathBuf::from(format!("./{name}.err"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global() -> GlobalConfig {
        GlobalConfig {
            threads: 2,
            default_walltime: Duration::from_secs(60),
            strategy: Strategy::Priority,
            default_priority: 100,
        }
    }

    #[test]
    fn effective_values_fall_back_to_global() {
        let job = JobDefinition::new("a", "true", Phase::Main, 0);
        assert_eq!(job.effective_walltime(&global()), Duration::from_secs(60));
        assert_eq!(job.effective_priority(&global()), 100);
    }

    #[test]
    fn effective_values_prefer_own() {
        let job = JobDefinition::new("a", "true", Phase::Main, 0)
            .with_walltime(Duration::from_secs(5))
            .with_priority(107);
        assert_eq!(job.effective_walltime(&global()), Duration::from_secs(5));
        assert_eq!(job.effective_priority(&global()), 107);
    }

    #[test]
    fn default_output_paths() {
        let job = JobDefinition::new("build", "make", Phase::Pre, 0);
        assert_eq!(job.stdout_path, PathBuf::from("./build.out"));
        assert_eq!(job.stderr_path, PathBuf::from("./build.err"));
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let job = JobDefinition::new("a", "true", Phase::Main, 3).with_priority(7);
        let once = job.resolved(&global());
        let twice = once.resolved(&global());
        assert_eq!(once, twice);
        assert_eq!(once.walltime, Some(Duration::from_secs(60)));
        assert_eq!(once.priority, Some(7));
    }

    #[test]
    fn strategy_parse_and_display() {
        for s in [Strategy::Priority, Strategy::WallTime, Strategy::Sequential] {
            assert_eq!(Strategy::parse(&s.to_string()), Some(s));
        }
        assert_eq!(Strategy::parse("fifo"), None);
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Pre.to_string(), "PRE");
        assert_eq!(Phase::Main.to_string(), "MAIN");
        assert_eq!(Phase::Post.to_string(), "POST");
    }
}
