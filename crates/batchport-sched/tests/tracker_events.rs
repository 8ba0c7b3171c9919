//! Tracker tests: event fan-out, monotonic transitions and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use batchport_channel::{ExecOutput, ScriptedChannel};
use batchport_launch::ResourceSpec;
use batchport_sched::dialect::{Pbs, Slurm};
use batchport_sched::{
    ClusterProvider, JobState, JobTracker, Provider, ProviderSettings, RetryPolicy,
};

fn settings(dir: &tempfile::TempDir, label: &str) -> ProviderSettings {
    ProviderSettings {
        label: Some(label.to_string()),
        staging_dir: dir.path().to_path_buf(),
        retry: RetryPolicy::none(),
        ..ProviderSettings::default()
    }
}

/// Job 1 walks PD, R, then a stale PD report, then leaves the queue and
/// shows up in sacct as completed.
fn progressing_slurm() -> ScriptedChannel {
    let polls = AtomicUsize::new(0);
    ScriptedChannel::new(move |cmd: &str| {
        if cmd.starts_with("sbatch ") {
            return Ok(ExecOutput::ok("Submitted batch job 1\n"));
        }
        if cmd.starts_with("sacct ") {
            return Ok(ExecOutput::ok("1|COMPLETED|0:0\n"));
        }
        let out = match polls.fetch_add(1, Ordering::SeqCst) {
            0 => "1|PD|Priority\n",
            1 => "1|R|None\n",
            2 => "1|PD|Resources\n",
            _ => "",
        };
        Ok(ExecOutput::ok(out))
    })
}

#[tokio::test]
async fn test_events_are_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ClusterProvider::new(Slurm::new(), Arc::new(progressing_slurm()))
            .with_settings(settings(&dir, "cluster-a")),
    );
    provider.submit("true", &ResourceSpec::new()).await.unwrap();

    let tracker = JobTracker::new().with_provider(provider.clone());
    let mut rx = tracker.subscribe();

    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.extend(tracker.poll_once().await);
    }

    let path: Vec<(JobState, JobState)> = seen.iter().map(|e| (e.from, e.to)).collect();
    assert_eq!(
        path,
        vec![
            (JobState::Pending, JobState::Running),
            (JobState::Running, JobState::Done),
        ]
    );
    assert!(seen.iter().all(|e| e.provider == "cluster-a"));
    assert!(seen.iter().all(|e| e.from.rank() < e.to.rank()));

    let first = rx.recv().await.unwrap();
    assert_eq!(first, seen[0]);
    let second = rx.recv().await.unwrap();
    assert_eq!(second, seen[1]);
}

#[tokio::test]
async fn test_failing_provider_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let healthy = Arc::new(
        ClusterProvider::new(Slurm::new(), Arc::new(progressing_slurm()))
            .with_settings(settings(&dir, "healthy")),
    );
    healthy.submit("true", &ResourceSpec::new()).await.unwrap();

    let broken_channel = Arc::new(ScriptedChannel::new(|cmd: &str| {
        if cmd.starts_with("qsub ") {
            Ok(ExecOutput::ok("77.pbs01\n"))
        } else {
            Ok(ExecOutput::failed(2, "qstat: cannot connect to server"))
        }
    }));
    let broken = Arc::new(
        ClusterProvider::new(Pbs::new(), broken_channel).with_settings(settings(&dir, "broken")),
    );
    broken.submit("true", &ResourceSpec::new()).await.unwrap();

    let tracker = JobTracker::new()
        .with_provider(broken.clone())
        .with_provider(healthy.clone());

    tracker.poll_once().await;
    let events = tracker.poll_once().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].provider, "healthy");
    assert_eq!(events[0].to, JobState::Running);

    let stuck = broken.jobs().await;
    assert_eq!(stuck[0].state, JobState::Pending);
}

#[tokio::test]
async fn test_retention_sweeps_finished_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let channel = Arc::new(ScriptedChannel::new(|cmd: &str| {
        if cmd.starts_with("sbatch ") {
            Ok(ExecOutput::ok("Submitted batch job 5\n"))
        } else if cmd.starts_with("sacct ") {
            Ok(ExecOutput::ok("5|COMPLETED|0:0\n"))
        } else {
            Ok(ExecOutput::ok(""))
        }
    }));
    let provider = Arc::new(
        ClusterProvider::new(Slurm::new(), channel).with_settings(settings(&dir, "slurm")),
    );
    provider.submit("true", &ResourceSpec::new()).await.unwrap();

    let tracker = JobTracker::new()
        .with_provider(provider.clone())
        .with_retention(Duration::ZERO);

    let events = tracker.poll_once().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].to, JobState::Done);

    // Swept on the next round, once its update is in the past.
    tokio::time::sleep(Duration::from_millis(10)).await;
    tracker.poll_once().await;
    assert!(provider.jobs().await.is_empty());
}

#[tokio::test]
async fn test_background_loop_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ClusterProvider::new(Slurm::new(), Arc::new(progressing_slurm()))
            .with_settings(settings(&dir, "bg")),
    );
    provider.submit("true", &ResourceSpec::new()).await.unwrap();

    let tracker = Arc::new(JobTracker::new().with_provider(provider.clone()));
    let mut rx = tracker.subscribe();
    let handle = tracker.clone().start(Duration::from_millis(20));

    let running = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running.to, JobState::Running);

    let done = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.to, JobState::Done);

    handle.shutdown().await;
}
