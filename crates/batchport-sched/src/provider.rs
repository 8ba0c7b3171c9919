//! The uniform provider interface.

use std::time::Duration;

use async_trait::async_trait;
use batchport_launch::ResourceSpec;
use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobState};

/// A state transition observed while polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub job_id: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// Submits, tracks and cancels jobs on one execution backend.
///
/// Implementations keep a table of the jobs they submitted. States in that
/// table only move forward, so once a job is terminal every later query
/// reports the same terminal state.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in logs, events and persisted records.
    fn label(&self) -> &str;

    /// Submit `command` with the requested resources.
    async fn submit(&self, command: &str, spec: &ResourceSpec) -> SchedResult<JobId> {
        self.submit_named(command, spec, None).await
    }

    /// Submit with a caller-chosen base name for the job.
    async fn submit_named(
        &self,
        command: &str,
        spec: &ResourceSpec,
        name: Option<&str>,
    ) -> SchedResult<JobId>;

    /// Current state of each requested job. In-flight jobs are queried in
    /// one backend call; terminal jobs are answered from the job table.
    async fn status(&self, job_ids: &[JobId]) -> SchedResult<FxHashMap<JobId, JobState>>;

    /// Cancel one job.
    async fn cancel(&self, job_id: &JobId) -> SchedResult<()> {
        self.cancel_many(std::slice::from_ref(job_id))
            .await
            .into_iter()
            .next()
            .map_or(Ok(()), |(_, result)| result)
    }

    /// Cancel several jobs with one backend call. Each id gets its own
    /// result.
    async fn cancel_many(&self, job_ids: &[JobId]) -> Vec<(JobId, SchedResult<()>)>;

    /// Poll every in-flight job and return the transitions observed.
    async fn refresh(&self) -> SchedResult<Vec<StateChange>>;

    /// Adopt a job submitted earlier, e.g. one restored from disk.
    async fn track(&self, job: Job);

    /// Snapshot of one job.
    async fn job(&self, job_id: &JobId) -> Option<Job>;

    /// Snapshot of every tracked job.
    async fn jobs(&self) -> Vec<Job>;

    /// Stop tracking a job. Does not cancel it.
    async fn release(&self, job_id: &JobId) -> Option<Job>;

    /// Drop terminal jobs that have not changed for `retention`.
    async fn sweep(&self, retention: Duration) -> Vec<Job>;

    /// Release the underlying channel.
    async fn close(&self) -> SchedResult<()>;
}

/// Poll `job_id` until it is terminal.
///
/// Returns the final job snapshot, or [`SchedError::Timeout`] once
/// `max_wait` has elapsed.
pub async fn wait_for(
    provider: &dyn Provider,
    job_id: &JobId,
    poll_interval: Duration,
    max_wait: Option<Duration>,
) -> SchedResult<Job> {
    let start = Instant::now();

    loop {
        let states = provider.status(std::slice::from_ref(job_id)).await?;
        let terminal = states.get(job_id).is_some_and(|s| s.is_terminal());
        if terminal {
            return provider
                .job(job_id)
                .await
                .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()));
        }

        if let Some(max_wait) = max_wait {
            if start.elapsed() > max_wait {
                return Err(SchedError::Timeout(format!(
                    "Timeout waiting for job {job_id}"
                )));
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}
