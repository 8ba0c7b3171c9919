//! End-to-end tests with the local provider.
//!
//! Jobs run as real background processes under a temporary directory.

use std::time::Duration;

use batchport_launch::{LauncherKind, ResourceSpec};
use batchport_sched::{JobState, LocalProvider, Provider, SchedError, wait_for};

const POLL: Duration = Duration::from_millis(100);
const MAX_WAIT: Option<Duration> = Some(Duration::from_secs(30));

#[tokio::test]
async fn test_successful_job_is_done() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::local(dir.path()).await.unwrap();

    let id = provider
        .submit("echo hello", &ResourceSpec::new())
        .await
        .unwrap();
    let job = wait_for(&provider, &id, POLL, MAX_WAIT).await.unwrap();

    assert_eq!(job.state, JobState::Done);
    assert!(job.error.is_none());
    let stdout = std::fs::read_to_string(job.stdout_path.unwrap()).unwrap();
    assert_eq!(stdout.trim(), "hello");
}

#[tokio::test]
async fn test_failing_job_is_failed() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::local(dir.path()).await.unwrap();

    let id = provider.submit("exit 3", &ResourceSpec::new()).await.unwrap();
    let job = wait_for(&provider, &id, POLL, MAX_WAIT).await.unwrap();

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("exit code 3"));

    // Terminal states stick.
    let states = provider.status(&[id.clone()]).await.unwrap();
    assert_eq!(states[&id], JobState::Failed);
}

#[tokio::test]
async fn test_single_node_launcher_runs_every_task() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::local(dir.path())
        .await
        .unwrap()
        .with_launcher(LauncherKind::SingleNode.build(""));

    let spec = ResourceSpec::new().with_tasks_per_node(3);
    let id = provider.submit("echo task", &spec).await.unwrap();
    let job = wait_for(&provider, &id, POLL, MAX_WAIT).await.unwrap();

    assert_eq!(job.state, JobState::Done);
    let stdout = std::fs::read_to_string(job.stdout_path.unwrap()).unwrap();
    assert_eq!(stdout.lines().filter(|l| *l == "task").count(), 3);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::local(dir.path()).await.unwrap();

    let id = provider.submit("sleep 30", &ResourceSpec::new()).await.unwrap();
    provider.cancel(&id).await.unwrap();

    let job = provider.job(&id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);

    let states = provider.status(&[id.clone()]).await.unwrap();
    assert_eq!(states[&id], JobState::Cancelled);
}

#[tokio::test]
async fn test_cancel_after_exit_reports_real_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::local(dir.path()).await.unwrap();

    let id = provider.submit("exit 1", &ResourceSpec::new()).await.unwrap();
    let script = provider.job(&id).await.unwrap().script_path.unwrap();
    let exit_code_file = format!("{}.ec", script.display());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !std::path::Path::new(&exit_code_file).exists() {
        assert!(tokio::time::Instant::now() < deadline, "job never exited");
        tokio::time::sleep(POLL).await;
    }

    let err = provider.cancel(&id).await.unwrap_err();
    assert!(matches!(err, SchedError::Cancellation { .. }));

    let job = provider.job(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("exit code 1"));
}

#[tokio::test]
async fn test_wait_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::local(dir.path()).await.unwrap();

    let id = provider.submit("sleep 30", &ResourceSpec::new()).await.unwrap();
    let err = wait_for(&provider, &id, POLL, Some(Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::Timeout(_)));

    provider.cancel(&id).await.unwrap();
}
