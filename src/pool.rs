//! Execution pool: a bounded set of slots, each holding one running process.
//!
//! Every job runs as `<shell> -c <command>` in its own process group so a
//! timed-out job can be reclaimed together with everything it forked.
//! Slot bookkeeping is owned by the pool and only mutated through
//! `&mut self`, so acquire and release cannot interleave.

use std::fs::{self, File};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::definition::JobDefinition;
use crate::error::ExecutorError;
use crate::state_machine::JobRecord;

/// Result of handing a job to the pool.
#[derive(Debug)]
pub enum Dispatch {
    /// The process is running and occupies a slot.
    Running { key: usize, started: Instant },
    /// The process could not be spawned; the record is already FAILED and
    /// no slot is held.
    SpawnFailed(JobRecord),
}

struct RunningJob {
    record: JobRecord,
    child: Child,
    pgid: Option<Pid>,
    termination: Option<Termination>,
}

/// A job past its wall time: SIGTERM sent, SIGKILL due at `kill_at`.
struct Termination {
    kill_at: Instant,
    killed: bool,
    status: Option<ExitStatus>,
}

impl Termination {
    /// Advance one step without blocking. Yields the leader's exit status
    /// once the group is reclaimed.
    fn advance(&mut self, child: &mut Child, pgid: Option<Pid>, now: Instant) -> Option<Option<ExitStatus>> {
        if self.status.is_none() {
            match child.try_wait() {
                Ok(status) => self.status = status,
                Err(e) => {
                    warn!(error = %e, "failed to poll terminating job");
                    if self.killed {
                        return Some(None);
                    }
                }
            }
        }

        let group_gone = pgid.is_none_or(|pgid| !group_alive(pgid));
        if self.status.is_some() && (self.killed || group_gone) {
            return Some(self.status);
        }

        if !self.killed && now >= self.kill_at {
            match pgid {
                Some(pgid) => {
                    debug!(pgid = pgid.as_raw(), "grace period over, sending SIGKILL");
                    signal_group(pgid, Signal::SIGKILL);
                }
                None => {
                    let _ = child.start_kill();
                }
            }
            self.killed = true;
            if self.status.is_some() {
                return Some(self.status);
            }
        }
        None
    }
}

/// Bounded slot table of running jobs.
///
/// A slot is held from dispatch until the job is reported terminal by
/// [`ExecutionPool::poll_completions`], including any termination grace period.
pub struct ExecutionPool {
    slots: usize,
    shell: String,
    grace: Duration,
    create_output_dirs: bool,
    running: Vec<RunningJob>,
    peak: usize,
}

impl ExecutionPool {
    /// Create an empty pool with `slots` slots (at least one).
    pub fn new(slots: usize, config: &RunnerConfig) -> Self {
        Self {
            slots: slots.max(1),
            shell: config.shell.clone(),
            grace: config.grace_period(),
            create_output_dirs: config.create_output_dirs,
            running: Vec::new(),
            peak: 0,
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// True when another job can be dispatched.
    pub fn has_free_slot(&self) -> bool {
        self.running.len() < self.slots
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    /// Highest number of simultaneously running jobs seen so far.
    pub fn peak_running(&self) -> usize {
        self.peak
    }

    /// Spawn `job` into a free slot.
    pub fn dispatch(&mut self, job: &JobDefinition) -> Result<Dispatch, ExecutorError> {
        if !self.has_free_slot() {
            return Err(ExecutorError::NoFreeSlot(job.name.clone()));
        }

        let mut record = JobRecord::new(job);
        let child = match self.spawn(job) {
            Ok(child) => child,
            Err(e) => {
                warn!(job = %job.name, error = %e, "failed to spawn job");
                record.spawn_failed(e.to_string(), Utc::now())?;
                return Ok(Dispatch::SpawnFailed(record));
            }
        };

        let pid = child.id();
        record.start(pid, Utc::now())?;
        let started = Instant::now();
        info!(job = %job.name, phase = %job.phase, pid, command = %job.command, "job started");

        self.running.push(RunningJob {
            record,
            child,
            pgid: pid.map(|p| Pid::from_raw(p as i32)),
            termination: None,
        });
        self.peak = self.peak.max(self.running.len());
        debug!(running = self.running.len(), slots = self.slots, "slot acquired");

        Ok(Dispatch::Running {
            key: job.declared_order,
            started,
        })
    }

    /// Reap every job that reached a terminal state since the last call.
    ///
    /// Jobs that exited on their own are SUCCEEDED or FAILED; jobs under
    /// termination are TIMED_OUT once their process group is gone, and get
    /// SIGKILL here when their grace period has run out. Never blocks.
    pub fn poll_completions(&mut self) -> Result<Vec<JobRecord>, ExecutorError> {
        let now = Instant::now();
        let mut finished = Vec::new();
        let mut index = 0;
        while index < self.running.len() {
            let job = &mut self.running[index];
            let reaped = match job.termination.as_mut() {
                None => match job.child.try_wait() {
                    Ok(status) => status.map(Reaped::Exited),
                    Err(e) => {
                        warn!(job = %job.record.name, error = %e, "failed to poll job");
                        None
                    }
                },
                Some(termination) => termination
                    .advance(&mut job.child, job.pgid, now)
                    .map(Reaped::Terminated),
            };
            let Some(reaped) = reaped else {
                index += 1;
                continue;
            };

            let mut job = self.running.swap_remove(index);
            match reaped {
                Reaped::Exited(status) => {
                    job.record.complete(exit_code(status), Utc::now())?;
                    info!(
                        job = %job.record.name,
                        state = %job.record.state,
                        exit_code = job.record.exit_code,
                        "job finished"
                    );
                }
                Reaped::Terminated(status) => {
                    job.record.time_out(status.map(exit_code), Utc::now())?;
                    warn!(job = %job.record.name, exit_code = job.record.exit_code, "job timed out");
                }
            }
            finished.push(job.record);
        }
        finished.sort_by_key(|r| r.declared_order);
        Ok(finished)
    }

    /// Start terminating a running job and all of its descendants.
    ///
    /// SIGTERM goes to the whole process group now; the job keeps its slot
    /// until [`poll_completions`](Self::poll_completions) reports it TIMED_OUT.
    /// Returns false if `key` is not running or is already being terminated.
    pub fn begin_terminate(&mut self, key: usize) -> bool {
        let now = Instant::now();
        let kill_at = now.checked_add(self.grace).unwrap_or(now);
        let Some(job) = self
            .running
            .iter_mut()
            .find(|j| j.record.declared_order == key && j.termination.is_none())
        else {
            return false;
        };

        warn!(job = %job.record.name, "wall time exceeded, terminating process group");
        let killed = match job.pgid {
            Some(pgid) => {
                signal_group(pgid, Signal::SIGTERM);
                false
            }
            None => {
                let _ = job.child.start_kill();
                true
            }
        };
        job.termination = Some(Termination {
            kill_at,
            killed,
            status: None,
        });
        true
    }

    /// Time until the earliest pending SIGKILL escalation, if any.
    pub fn next_escalation(&self, now: Instant) -> Option<Duration> {
        self.running
            .iter()
            .filter_map(|j| j.termination.as_ref())
            .filter(|t| !t.killed)
            .map(|t| t.kill_at.saturating_duration_since(now))
            .min()
    }

    fn spawn(&self, job: &JobDefinition) -> std::io::Result<Child> {
        let stdout = self.open_output(&job.stdout_path)?;
        let stderr = if job.stderr_path == job.stdout_path {
            stdout.try_clone()?
        } else {
            self.open_output(&job.stderr_path)?
        };

        Command::new(&self.shell)
            .arg("-c")
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
    }

    fn open_output(&self, path: &Path) -> std::io::Result<File> {
        if self.create_output_dirs
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        File::create(path)
    }
}

enum Reaped {
    Exited(ExitStatus),
    Terminated(Option<ExitStatus>),
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        // Whatever is still running when the pool goes away must not outlive it.
        for job in &self.running {
            if let Some(pgid) = job.pgid {
                signal_group(pgid, Signal::SIGKILL);
            }
        }
    }
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pgid.as_raw(), %signal, error = %e, "failed to signal process group"),
    }
}

fn group_alive(pgid: Pid) -> bool {
    !matches!(killpg(pgid, None), Err(Errno::ESRCH))
}

/// Exit code of a finished process; `128 + signal` when killed by a signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Phase;
    use crate::state_machine::{JobState, SPAWN_FAILURE_EXIT_CODE};

    fn config() -> RunnerConfig {
        RunnerConfig {
            poll_interval_ms: 20,
            grace_period_ms: 300,
            shell: "/bin/sh".into(),
            create_output_dirs: true,
        }
    }

    fn job(dir: &Path, order: usize, command: &str) -> JobDefinition {
        let name = format!("job_{order}");
        JobDefinition::new(&name, command, Phase::Main, order).with_output(
            dir.join(format!("{name}.out")),
            dir.join(format!("{name}.err")),
        )
    }

    async fn wait_idle(pool: &mut ExecutionPool) -> Vec<JobRecord> {
        let mut done = Vec::new();
        let give_up = Instant::now() + Duration::from_secs(10);
        while !pool.is_idle() {
            assert!(Instant::now() < give_up, "jobs did not finish in time");
            done.extend(pool.poll_completions().unwrap());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        done
    }

    async fn terminate(pool: &mut ExecutionPool, key: usize) -> JobRecord {
        assert!(pool.begin_terminate(key));
        reclaimed(pool, key).await
    }

    async fn reclaimed(pool: &mut ExecutionPool, key: usize) -> JobRecord {
        let give_up = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(record) = pool
                .poll_completions()
                .unwrap()
                .into_iter()
                .find(|r| r.declared_order == key)
            {
                return record;
            }
            assert!(Instant::now() < give_up, "job was never reclaimed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Alive and not a zombie.
    fn process_alive(pid: i32) -> bool {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z"),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn redirects_output_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = ExecutionPool::new(2, &config());
        let def = job(dir.path(), 0, "echo hello; echo oops >&2");

        let dispatch = pool.dispatch(&def).unwrap();
        assert!(matches!(dispatch, Dispatch::Running { key: 0, .. }));
        assert_eq!(pool.running_count(), 1);

        let done = wait_idle(&mut pool).await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].state, JobState::Succeeded);
        assert_eq!(done[0].exit_code, Some(0));
        assert!(done[0].pid.is_none());

        assert_eq!(fs::read_to_string(&def.stdout_path).unwrap(), "hello\n");
        assert_eq!(fs::read_to_string(&def.stderr_path).unwrap(), "oops\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = ExecutionPool::new(1, &config());
        pool.dispatch(&job(dir.path(), 0, "exit 3")).unwrap();

        let done = wait_idle(&mut pool).await;
        assert_eq!(done[0].state, JobState::Failed);
        assert_eq!(done[0].exit_code, Some(3));
    }

    #[tokio::test]
    async fn shared_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("both.log");
        let def = job(dir.path(), 0, "echo out; echo err >&2").with_output(&log, &log);
        let mut pool = ExecutionPool::new(1, &config());
        pool.dispatch(&def).unwrap();
        wait_idle(&mut pool).await;

        let contents = fs::read_to_string(&log).unwrap();
        assert!(contents.contains("out\n"));
        assert!(contents.contains("err\n"));
    }

    #[tokio::test]
    async fn creates_missing_output_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/deeper/x.out");
        let def = job(dir.path(), 0, "echo x").with_output(&out, dir.path().join("x.err"));
        let mut pool = ExecutionPool::new(1, &config());
        pool.dispatch(&def).unwrap();
        wait_idle(&mut pool).await;
        assert!(out.exists());
    }

    #[tokio::test]
    async fn unspawnable_job_fails_without_holding_a_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.shell = "/nonexistent/shell".into();
        let mut pool = ExecutionPool::new(1, &cfg);

        match pool.dispatch(&job(dir.path(), 0, "true")).unwrap() {
            Dispatch::SpawnFailed(record) => {
                assert_eq!(record.state, JobState::Failed);
                assert_eq!(record.exit_code, Some(SPAWN_FAILURE_EXIT_CODE));
                assert!(record.error.is_some());
            }
            other => panic!("expected spawn failure, got {other:?}"),
        }
        assert!(pool.is_idle());
        assert!(pool.has_free_slot());
    }

    #[tokio::test]
    async fn unwritable_output_is_a_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.create_output_dirs = false;
        let def = job(dir.path(), 0, "true")
            .with_output(dir.path().join("missing/x.out"), dir.path().join("x.err"));
        let mut pool = ExecutionPool::new(1, &cfg);
        assert!(matches!(pool.dispatch(&def).unwrap(), Dispatch::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn refuses_dispatch_without_free_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = ExecutionPool::new(1, &config());
        pool.dispatch(&job(dir.path(), 0, "sleep 5")).unwrap();

        let err = pool.dispatch(&job(dir.path(), 1, "true")).unwrap_err();
        assert!(matches!(err, ExecutorError::NoFreeSlot(_)));
        assert_eq!(pool.running_count(), 1);
        assert_eq!(pool.peak_running(), 1);

        let record = terminate(&mut pool, 0).await;
        assert_eq!(record.state, JobState::TimedOut);
        assert!(pool.has_free_slot());
    }

    #[tokio::test]
    async fn huge_slot_count_does_not_preallocate() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = ExecutionPool::new(usize::MAX, &config());
        assert!(pool.has_free_slot());
        pool.dispatch(&job(dir.path(), 0, "true")).unwrap();
        let done = wait_idle(&mut pool).await;
        assert_eq!(done[0].state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn terminate_reclaims_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let command = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let mut pool = ExecutionPool::new(1, &config());
        pool.dispatch(&job(dir.path(), 0, &command)).unwrap();

        let give_up = Instant::now() + Duration::from_secs(5);
        let child_pid: i32 = loop {
            if let Ok(text) = fs::read_to_string(&pid_file)
                && let Ok(pid) = text.trim().parse()
            {
                break pid;
            }
            assert!(Instant::now() < give_up, "child pid never written");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert!(process_alive(child_pid));

        let record = terminate(&mut pool, 0).await;
        assert_eq!(record.state, JobState::TimedOut);
        assert!(record.exit_code.is_some());
        assert!(pool.is_idle());

        // Reparented children are reaped asynchronously.
        let give_up = Instant::now() + Duration::from_secs(2);
        while process_alive(child_pid) && Instant::now() < give_up {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!process_alive(child_pid));
    }

    #[tokio::test]
    async fn terminate_escalates_to_sigkill() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = ExecutionPool::new(1, &config());
        pool.dispatch(&job(dir.path(), 0, "trap '' TERM; sleep 30")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let record = terminate(&mut pool, 0).await;
        assert_eq!(record.state, JobState::TimedOut);
        assert_eq!(record.exit_code, Some(128 + 9));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn terminating_job_keeps_its_slot_until_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = ExecutionPool::new(1, &config());
        pool.dispatch(&job(dir.path(), 0, "trap '' TERM; sleep 30")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(pool.begin_terminate(0));
        assert!(!pool.begin_terminate(0));
        assert!(pool.poll_completions().unwrap().is_empty());
        assert!(!pool.has_free_slot());
        let wait = pool.next_escalation(Instant::now()).unwrap();
        assert!(wait <= Duration::from_millis(300));

        let done = wait_idle(&mut pool).await;
        assert_eq!(done[0].state, JobState::TimedOut);
        assert!(pool.has_free_slot());
        assert!(pool.next_escalation(Instant::now()).is_none());
    }

    #[tokio::test]
    async fn terminations_overlap_without_waiting_on_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = ExecutionPool::new(2, &config());
        pool.dispatch(&job(dir.path(), 0, "trap '' TERM; sleep 30")).unwrap();
        pool.dispatch(&job(dir.path(), 1, "sleep 30")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        assert!(pool.begin_terminate(0));
        assert!(pool.begin_terminate(1));

        // The job that honours SIGTERM is reclaimed well inside the grace
        // period of the one that ignores it.
        let record = reclaimed(&mut pool, 1).await;
        assert_eq!(record.state, JobState::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(250), "{:?}", started.elapsed());
        assert_eq!(pool.running_count(), 1);

        let record = reclaimed(&mut pool, 0).await;
        assert_eq!(record.exit_code, Some(128 + 9));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn begin_terminate_unknown_key_is_noop() {
        let mut pool = ExecutionPool::new(1, &config());
        assert!(!pool.begin_terminate(7));
    }
}
