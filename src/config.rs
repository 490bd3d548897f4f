//! Runner tunables loaded from `job-executor.toml`.
//!
//! These are about how the executor supervises processes, not about the
//! jobs themselves (those live in the YAML job file). Values missing from
//! the file use defaults. `JOB_EXECUTOR_SHELL` takes precedence over the
//! file for the shell.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ExecutorError;

pub const CONFIG_FILE: &str = "job-executor.toml";
pub const SHELL_ENV: &str = "JOB_EXECUTOR_SHELL";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Completion and wall-time poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time between SIGTERM and SIGKILL for a timed-out job, in milliseconds.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Shell that runs each command as `<shell> -c <command>`.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Create missing parent directories of stdout/stderr paths.
    #[serde(default = "default_create_output_dirs")]
    pub create_output_dirs: bool,
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_grace_period_ms() -> u64 {
    2000
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_create_output_dirs() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            shell: default_shell(),
            create_output_dirs: default_create_output_dirs(),
        }
    }
}

impl RunnerConfig {
    /// Load `job-executor.toml` from the current directory, or defaults.
    pub fn load() -> Result<Self, ExecutorError> {
        Self::load_from(Path::new(CONFIG_FILE), false)
    }

    /// Load from `path`. A missing file is an error only when `required`.
    pub fn load_from(path: &Path, required: bool) -> Result<Self, ExecutorError> {
        let mut config = if path.exists() || required {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<RunnerConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(shell) = std::env::var(SHELL_ENV)
            && !shell.trim().is_empty()
        {
            config.shell = shell;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.poll_interval_ms == 0 {
            return Err(ExecutorError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.grace_period_ms == 0 {
            return Err(ExecutorError::Config("grace_period_ms must be > 0".into()));
        }
        if self.shell.trim().is_empty() {
            return Err(ExecutorError::Config("shell must not be empty".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
