//! JSON file-based persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::fs;
use tokio::sync::RwLock;

use crate::dialect::sanitize_name;
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId};
use crate::persistence::JobStore;

type StoreKey = (String, JobId);

/// JSON file-based job store.
///
/// Stores each job as a separate file under `<base>/jobs/`. The CLI uses
/// it to carry job records across invocations.
pub struct JsonStore {
    /// Base directory for storage.
    base_dir: PathBuf,

    /// In-memory cache of jobs.
    cache: RwLock<FxHashMap<StoreKey, Job>>,
}

impl JsonStore {
    /// Open or create a store at the given path.
    pub async fn new(base_dir: impl AsRef<Path>) -> SchedResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();

        fs::create_dir_all(base_dir.join("jobs")).await?;

        let store = Self {
            base_dir,
            cache: RwLock::new(FxHashMap::default()),
        };

        store.load_all_jobs().await?;

        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn job_path(&self, provider: &str, job_id: &JobId) -> PathBuf {
        self.base_dir.join("jobs").join(format!(
            "{}--{}.json",
            sanitize_name(provider),
            sanitize_name(job_id.as_str())
        ))
    }

    async fn load_all_jobs(&self) -> SchedResult<()> {
        let jobs_dir = self.base_dir.join("jobs");
        let mut cache = self.cache.write().await;

        let mut entries = fs::read_dir(&jobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<Job>(&content) {
                        Ok(job) => {
                            cache.insert((job.provider.clone(), job.id.clone()), job);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to parse job file {:?}: {}", path, e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to read job file {:?}: {}", path, e);
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonStore {
    async fn save_job(&self, job: &Job) -> SchedResult<()> {
        let path = self.job_path(&job.provider, &job.id);
        let json = serde_json::to_string_pretty(job)?;
        // Written aside, then renamed into place.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        let mut cache = self.cache.write().await;
        cache.insert((job.provider.clone(), job.id.clone()), job.clone());

        Ok(())
    }

    async fn load_job(&self, provider: &str, job_id: &JobId) -> SchedResult<Option<Job>> {
        let key = (provider.to_string(), job_id.clone());
        let cache = self.cache.read().await;
        if let Some(job) = cache.get(&key) {
            return Ok(Some(job.clone()));
        }
        drop(cache);

        let path = self.job_path(provider, job_id);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let job: Job = serde_json::from_str(&content).map_err(|e| {
                    SchedError::Persistence(format!("corrupt job file {}: {e}", path.display()))
                })?;
                let mut cache = self.cache.write().await;
                cache.insert(key, job.clone());
                Ok(Some(job))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SchedError::Io(e)),
        }
    }

    async fn delete_job(&self, provider: &str, job_id: &JobId) -> SchedResult<bool> {
        let path = self.job_path(provider, job_id);

        let mut cache = self.cache.write().await;
        let was_present = cache
            .remove(&(provider.to_string(), job_id.clone()))
            .is_some();

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(was_present),
            Err(e) => Err(SchedError::Io(e)),
        }
    }

    async fn list_jobs(&self) -> SchedResult<Vec<Job>> {
        let cache = self.cache.read().await;
        let mut jobs: Vec<Job> = cache.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    async fn cleanup_old_jobs(&self, max_age: Duration) -> SchedResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| SchedError::Config(format!("retention out of range: {e}")))?;
        let cutoff = chrono::Utc::now() - max_age;

        let expired: Vec<StoreKey> = {
            let cache = self.cache.read().await;
            cache
                .iter()
                .filter(|(_, job)| job.is_terminal() && job.updated_at < cutoff)
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut removed = 0;
        for (provider, job_id) in &expired {
            if self.delete_job(provider, job_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use batchport_launch::ResourceSpec;

    fn job(provider: &str, id: &str) -> Job {
        Job::new(JobId::from(id), provider, "bp.test", "echo hi", ResourceSpec::new())
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStore::new(dir.path()).await.unwrap();
            store.save_job(&job("slurm", "100")).await.unwrap();
            store.save_job(&job("pbs", "100.server")).await.unwrap();
        }

        let store = JsonStore::new(dir.path()).await.unwrap();
        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);

        let loaded = store
            .load_job("pbs", &JobId::from("100.server"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.provider, "pbs");
        assert!(store.load_job("slurm", &JobId::from("999")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_id_different_providers() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();
        store.save_job(&job("a", "1")).await.unwrap();
        store.save_job(&job("b", "1")).await.unwrap();
        assert_eq!(store.list_jobs().await.unwrap().len(), 2);

        assert!(store.delete_job("a", &JobId::from("1")).await.unwrap());
        assert!(!store.delete_job("a", &JobId::from("1")).await.unwrap());
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("jobs")).unwrap();
        std::fs::write(dir.path().join("jobs/broken.json"), "{not json").unwrap();

        let store = JsonStore::new(dir.path()).await.unwrap();
        assert!(store.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_old_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        let mut old = job("slurm", "1");
        old.advance(JobState::Done);
        old.updated_at = chrono::Utc::now() - chrono::Duration::days(2);
        store.save_job(&old).await.unwrap();
        store.save_job(&job("slurm", "2")).await.unwrap();

        let removed = store.cleanup_old_jobs(Duration::from_secs(86400)).await.unwrap();
        assert_eq!(removed, 1);
        let left = store.list_jobs().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, JobId::from("2"));
    }
}
