//! Error handling for providers.

use batchport_channel::ChannelError;
use batchport_launch::LaunchError;
use thiserror::Error;

/// Result type for provider operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SchedError {
    /// Channel could not reach the execution target.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A backend command exceeded its timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The backend refused the submission or answered unexpectedly.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The job could not be cancelled.
    #[error("Cancellation failed for job {job_id}: {reason}")]
    Cancellation { job_id: String, reason: String },

    /// The launcher cannot express the requested resources.
    #[error("Unsupported resource request: {0}")]
    UnsupportedResource(String),

    /// Job is not known to this provider.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The provider already has `max_jobs` jobs in flight.
    #[error("Provider {provider} at capacity ({max_jobs} jobs in flight)")]
    AtCapacity { provider: String, max_jobs: usize },

    /// A backend query command failed.
    #[error("Backend command failed: {command} (exit {exit_code}): {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence error.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Channel error other than connection loss or timeout.
    #[error("Channel error: {0}")]
    Channel(ChannelError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchedError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedError::Connection(_))
    }

    pub(crate) fn cancellation(job_id: impl ToString, reason: impl Into<String>) -> Self {
        SchedError::Cancellation {
            job_id: job_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ChannelError> for SchedError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Connection { .. } => SchedError::Connection(e.to_string()),
            ChannelError::Timeout { .. } => SchedError::Timeout(e.to_string()),
            other => SchedError::Channel(other),
        }
    }
}

impl From<LaunchError> for SchedError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::UnsupportedResource { .. } => SchedError::UnsupportedResource(e.to_string()),
            other => SchedError::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = SchedError::JobNotFound("4242".to_string());
        assert_eq!(err.to_string(), "Job not found: 4242");

        let err = SchedError::cancellation("17", "job already DONE");
        assert_eq!(
            err.to_string(),
            "Cancellation failed for job 17: job already DONE"
        );

        let err = SchedError::AtCapacity {
            provider: "slurm".to_string(),
            max_jobs: 2,
        };
        assert_eq!(err.to_string(), "Provider slurm at capacity (2 jobs in flight)");
    }

    #[test]
    fn test_channel_error_conversion() {
        let err: SchedError = ChannelError::connection("login1", "reset").into();
        assert!(matches!(err, SchedError::Connection(_)));
        assert!(err.is_transient());

        let err: SchedError = ChannelError::Timeout {
            command: "squeue".into(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert!(matches!(err, SchedError::Timeout(_)));
        assert!(!err.is_transient());

        let err: SchedError = ChannelError::BadHostKey {
            host: "login1".into(),
        }
        .into();
        assert!(matches!(err, SchedError::Channel(_)));
    }

    #[test]
    fn test_launch_error_conversion() {
        use batchport_launch::{Launcher, ResourceSpec, SimpleLauncher};

        let spec = ResourceSpec::new().with_nodes(4);
        let err: SchedError = SimpleLauncher.wrap("hostname", &spec).unwrap_err().into();
        assert!(matches!(err, SchedError::UnsupportedResource(_)));

        let err: SchedError = "bad".parse::<batchport_launch::Walltime>().unwrap_err().into();
        assert!(matches!(err, SchedError::Config(_)));
    }
}
