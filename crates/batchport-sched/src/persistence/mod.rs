//! Persistence layer for job records.

mod json_store;

pub use json_store::JsonStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SchedResult;
use crate::job::{Job, JobId};

/// Trait for persistent job storage. Records are keyed by provider label
/// and job id, since ids are only unique within one backend.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Save or overwrite a job record.
    async fn save_job(&self, job: &Job) -> SchedResult<()>;

    /// Load a job record.
    async fn load_job(&self, provider: &str, job_id: &JobId) -> SchedResult<Option<Job>>;

    /// Delete a job record.
    async fn delete_job(&self, provider: &str, job_id: &JobId) -> SchedResult<bool>;

    /// All records, oldest submission first.
    async fn list_jobs(&self) -> SchedResult<Vec<Job>>;

    /// Delete terminal records unchanged for longer than `max_age`.
    async fn cleanup_old_jobs(&self, max_age: Duration) -> SchedResult<usize>;
}
