use std::path::Path;
use std::process::{Command, Output};

fn run_executor(dir: &Path, jobs_yaml: &str, extra: &[&str]) -> Output {
    let jobs = dir.join("jobs.yaml");
    std::fs::write(&jobs, jobs_yaml).unwrap();
    Command::new(env!("CARGO_BIN_EXE_job-executor"))
        .arg("--jobs")
        .arg(&jobs)
        .args(extra)
        .current_dir(dir)
        .env_remove("JOB_EXECUTOR_SHELL")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn successful_run_exits_zero_and_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = r#"
global:
  threads: 2
pre_job_items:
  - job: setup
    command: echo ready
job_items:
  - job: a
    command: echo a
  - job: b
    command: echo b
    stdout: logs/b.txt
post_job_items:
  - job: teardown
    command: echo done
"#;
    let output = run_executor(dir.path(), yaml, &[]);
    assert_eq!(output.status.code(), Some(0));

    assert_eq!(std::fs::read_to_string(dir.path().join("setup.out")).unwrap(), "ready\n");
    assert_eq!(std::fs::read_to_string(dir.path().join("logs/b.txt")).unwrap(), "b\n");
    assert!(dir.path().join("a.err").exists());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SUCCESS"));
}

#[test]
fn invalid_job_file_exits_two_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = "job_items:\n  - {job: a, command: 'touch ran'}\n  - {job: a, command: 'true'}\n";
    let output = run_executor(dir.path(), yaml, &[]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("ran").exists());
    assert!(String::from_utf8_lossy(&output.stderr).contains("duplicate job name"));
}

#[test]
fn missing_job_file_is_a_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_job-executor"))
        .args(["--jobs", "does-not-exist.yaml"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn pre_failure_exits_three() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = r#"
pre_job_items:
  - job: setup
    command: exit 1
job_items:
  - job: work
    command: touch worked
post_job_items:
  - job: cleanup
    command: touch cleaned
"#;
    let output = run_executor(dir.path(), yaml, &[]);
    assert_eq!(output.status.code(), Some(3));
    assert!(!dir.path().join("worked").exists());
    assert!(!dir.path().join("cleaned").exists());
}

#[test]
fn main_failure_exits_one_and_reports_json() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = r#"
job_items:
  - job: ok
    command: "true"
  - job: bad
    command: exit 5
post_job_items:
  - job: cleanup
    command: touch cleaned
"#;
    let output = run_executor(dir.path(), yaml, &["--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(dir.path().join("cleaned").exists());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "completed_with_failures");
    let main = &report["phases"][1];
    assert_eq!(main["phase"], "MAIN");
    assert_eq!(main["failed"], 1);
    assert_eq!(main["succeeded"], 1);
}

#[test]
fn timed_out_job_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("job-executor.toml"),
        "poll_interval_ms = 50\ngrace_period_ms = 200\n",
    )
    .unwrap();
    let yaml = r#"
job_items:
  - job: slow
    command: sleep 30
    wall_time: 1
"#;
    let started = std::time::Instant::now();
    let output = run_executor(dir.path(), yaml, &["--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["phases"][1]["jobs"][0]["state"], "TIMED_OUT");
}

#[test]
fn dry_run_prints_plan_and_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = r#"
global:
  strategy: priority
job_items:
  - {job: low, command: touch low, priority: 1}
  - {job: high, command: touch high, priority: 9}
"#;
    let output = run_executor(dir.path(), yaml, &["--dry-run"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(!dir.path().join("low").exists());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let high = stdout.find("high").unwrap();
    let low = stdout.find(" low").unwrap();
    assert!(high < low, "plan order wrong:\n{stdout}");
}

#[test]
fn huge_threads_and_wall_time_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = r#"
global:
  threads: 9223372036854775807
  wall_time: 9223372036854775807
job_items:
  - {job: a, command: "true"}
  - {job: b, command: "true", wall_time: 1e30}
  - {job: c, command: "true", wall_time: "99999999999999:00:00"}
"#;
    let output = run_executor(dir.path(), yaml, &["--json"]);
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["phases"][1]["succeeded"], 3);
}
