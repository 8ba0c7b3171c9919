//! Job handles and the normalized job lifecycle.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use batchport_launch::ResourceSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedError;

/// Backend-assigned job identifier (SLURM job id, PBS id, PID, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a job ID from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Normalized job state.
///
/// States only move forward: `Pending` → `Running` → one of the terminal
/// states. A terminal state never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    /// Position in the lifecycle. All terminal states share the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Done | JobState::Failed | JobState::Cancelled => 2,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Check if the job completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Done)
    }

    /// Whether a job in this state may move to `next`.
    pub fn can_advance_to(&self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "DONE" => Ok(JobState::Done),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" | "CANCELED" => Ok(JobState::Cancelled),
            other => Err(SchedError::Config(format!("unknown job state: {other}"))),
        }
    }
}

/// A submitted job as tracked by its provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Backend-assigned identifier.
    pub id: JobId,

    /// Label of the provider that submitted the job.
    pub provider: String,

    /// Generated job name (also the script file stem).
    pub name: String,

    /// Command as given by the caller, before launcher wrapping.
    pub command: String,

    /// Requested resources.
    pub resources: ResourceSpec,

    /// Current normalized state.
    pub state: JobState,

    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,

    /// When the state last changed.
    pub updated_at: DateTime<Utc>,

    /// Reason for failure, as reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Submit script path on the execution target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,

    /// Stdout path on the execution target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,

    /// Stderr path on the execution target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
}

impl Job {
    /// Create a pending job.
    pub fn new(
        id: JobId,
        provider: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        resources: ResourceSpec,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider: provider.into(),
            name: name.into(),
            command: command.into(),
            resources,
            state: JobState::Pending,
            submitted_at: now,
            updated_at: now,
            error: None,
            script_path: None,
            stdout_path: None,
            stderr_path: None,
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns whether the
    /// state changed; regressions and changes out of a terminal state are
    /// ignored.
    pub fn advance(&mut self, next: JobState) -> bool {
        if !self.state.can_advance_to(next) {
            if next != self.state {
                tracing::debug!(
                    job_id = %self.id,
                    from = %self.state,
                    to = %next,
                    "Ignoring non-monotonic state change"
                );
            }
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }

    /// Move to `Failed` and record the reason. Returns whether the state
    /// changed.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        let changed = self.advance(JobState::Failed);
        if changed {
            self.error = Some(reason.into());
        }
        changed
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job() -> Job {
        Job::new(JobId::from("100"), "slurm", "bp-test", "echo hi", ResourceSpec::new())
    }

    #[test]
    fn test_forward_transitions() {
        let mut job = job();
        assert!(job.advance(JobState::Running));
        assert!(!job.advance(JobState::Running));
        assert!(job.advance(JobState::Done));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_pending_may_skip_running() {
        let mut job = job();
        assert!(job.advance(JobState::Cancelled));
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[test]
    fn test_regressions_refused() {
        let mut job = job();
        job.advance(JobState::Running);
        assert!(!job.advance(JobState::Pending));
        assert_eq!(job.state, JobState::Running);

        job.advance(JobState::Failed);
        for next in [JobState::Pending, JobState::Running, JobState::Done, JobState::Cancelled] {
            assert!(!job.advance(next));
        }
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn test_fail_records_reason_once() {
        let mut job = job();
        assert!(job.fail("exit code 1"));
        assert_eq!(job.error.as_deref(), Some("exit code 1"));
        assert!(!job.fail("again"));
        assert_eq!(job.error.as_deref(), Some("exit code 1"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Cancelled.to_string(), "CANCELLED");
        assert_eq!("running".parse::<JobState>().unwrap(), JobState::Running);
        assert_eq!(
            serde_json::to_string(&JobState::Done).unwrap(),
            r#""DONE""#
        );
        assert!("queued".parse::<JobState>().is_err());
    }

    #[test]
    fn test_job_serde() {
        let mut job = job();
        job.script_path = Some(PathBuf::from("/scratch/bp-test.submit"));
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains(r#""id":"100""#));
        assert!(!json.contains("error"));
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }

    fn any_state() -> impl Strategy<Value = JobState> {
        prop_oneof![
            Just(JobState::Pending),
            Just(JobState::Running),
            Just(JobState::Done),
            Just(JobState::Failed),
            Just(JobState::Cancelled),
        ]
    }

    proptest! {
        #[test]
        fn state_never_regresses(updates in proptest::collection::vec(any_state(), 0..40)) {
            let mut job = job();
            let mut terminal: Option<JobState> = None;
            for next in updates {
                let before = job.state;
                job.advance(next);
                prop_assert!(job.state.rank() >= before.rank());
                if let Some(t) = terminal {
                    prop_assert_eq!(job.state, t);
                }
                if job.state.is_terminal() {
                    terminal = Some(job.state);
                }
            }
        }
    }
}
