//! Provider for batch schedulers reached through a channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batchport_channel::{Channel, ExecOutput, LocalChannel};
use batchport_launch::{Launcher, LauncherKind, ResourceSpec};
use chrono::Utc;
use rustc_hash::FxHashMap;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::dialect::{BatchSystem, LocalFork, ScriptContext, StagedFile, sanitize_name};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobState};
use crate::native::NativeStatus;
use crate::provider::{Provider, StateChange};
use crate::retry::RetryPolicy;

/// Provider running jobs as background processes on the channel's host.
pub type LocalProvider = ClusterProvider<LocalFork>;

/// Tunables shared by every cluster provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Overrides the dialect name as the provider label.
    pub label: Option<String>,

    /// Timeout for each command run on the channel.
    pub cmd_timeout: Duration,

    /// Maximum jobs in flight; `None` for no limit.
    pub max_jobs: Option<usize>,

    /// Environment modules loaded before the command.
    pub modules: Vec<String>,

    /// Shell lines run before the command, after modules.
    pub worker_init: String,

    /// Local directory where scripts are rendered before being pushed.
    pub staging_dir: PathBuf,

    /// Retry policy for submissions.
    pub retry: RetryPolicy,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            label: None,
            cmd_timeout: Duration::from_secs(10),
            max_jobs: None,
            modules: Vec::new(),
            worker_init: String::new(),
            staging_dir: std::env::temp_dir().join("batchport-staging"),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProviderSettings {
    /// Module loads followed by the worker init lines.
    fn prelude(&self) -> String {
        let mut prelude = String::new();
        for module in &self.modules {
            prelude.push_str(&format!("module load {module}\n"));
        }
        if !self.worker_init.trim().is_empty() {
            prelude.push_str(self.worker_init.trim_end());
            prelude.push('\n');
        }
        prelude
    }
}

/// A [`Provider`] that drives a [`BatchSystem`] over a [`Channel`].
///
/// All channel use is serialized: a submission holds the channel from the
/// first staged file until the job id is recorded.
pub struct ClusterProvider<S: BatchSystem> {
    label: String,
    system: S,
    channel: Mutex<Arc<dyn Channel>>,
    launcher: Box<dyn Launcher>,
    settings: ProviderSettings,
    jobs: RwLock<FxHashMap<JobId, Job>>,
}

impl<S: BatchSystem> std::fmt::Debug for ClusterProvider<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterProvider")
            .field("label", &self.label)
            .field("system", &self.system.name())
            .field("launcher", &self.launcher.name())
            .finish_non_exhaustive()
    }
}

impl<S: BatchSystem> ClusterProvider<S> {
    /// Create a provider with the simple launcher and default settings.
    pub fn new(system: S, channel: Arc<dyn Channel>) -> Self {
        Self {
            label: system.name().to_string(),
            system,
            channel: Mutex::new(channel),
            launcher: LauncherKind::Simple.build(""),
            settings: ProviderSettings::default(),
            jobs: RwLock::new(FxHashMap::default()),
        }
    }

    /// Set the launcher wrapping every command.
    pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the settings.
    pub fn with_settings(mut self, settings: ProviderSettings) -> Self {
        if let Some(ref label) = settings.label {
            self.label = label.clone();
        }
        self.settings = settings;
        self
    }

    /// The dialect this provider speaks.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Number of non-terminal jobs.
    pub async fn in_flight(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| !j.is_terminal())
            .count()
    }

    async fn check_capacity(&self) -> SchedResult<()> {
        if let Some(max_jobs) = self.settings.max_jobs {
            if self.in_flight().await >= max_jobs {
                return Err(SchedError::AtCapacity {
                    provider: self.label.clone(),
                    max_jobs,
                });
            }
        }
        Ok(())
    }

    /// Run one command with the channel held.
    async fn execute(&self, command: &str) -> SchedResult<ExecOutput> {
        let channel = self.channel.lock().await;
        debug!(provider = %self.label, command, "Executing");
        Ok(channel.execute(command, self.settings.cmd_timeout).await?)
    }

    /// Write staged files under the local staging directory. Returns
    /// `(local, remote)` pairs.
    async fn write_staged(&self, staged: Vec<StagedFile>) -> SchedResult<Vec<(PathBuf, PathBuf)>> {
        fs::create_dir_all(&self.settings.staging_dir).await?;
        let mut pairs = Vec::with_capacity(staged.len());
        for file in staged {
            let file_name = file.remote_path.file_name().ok_or_else(|| {
                SchedError::Config(format!(
                    "staged path has no file name: {}",
                    file.remote_path.display()
                ))
            })?;
            let local = self.settings.staging_dir.join(file_name);
            fs::write(&local, file.contents).await?;
            pairs.push((local, file.remote_path));
        }
        Ok(pairs)
    }

    /// One submission attempt: capacity check, push, submit, record. The
    /// channel is held throughout so concurrent submissions never
    /// interleave and the capacity check cannot race.
    async fn submit_once(
        &self,
        staged: &[(PathBuf, PathBuf)],
        command: &str,
        template: &Job,
    ) -> SchedResult<JobId> {
        let channel = self.channel.lock().await;
        self.check_capacity().await?;

        for (local, remote) in staged {
            channel.push_file(local, remote).await?;
        }

        debug!(provider = %self.label, command, "Submitting");
        let output = channel.execute(command, self.settings.cmd_timeout).await?;
        if !output.success() {
            return Err(SchedError::Submission(format!(
                "{} exited with {}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let job_id = self.system.parse_submit(&output.stdout)?;
        let mut job = template.clone();
        job.id = job_id.clone();
        self.jobs.write().await.insert(job_id.clone(), job);
        Ok(job_id)
    }

    /// Query the backend for `targets` and apply what it reports.
    async fn poll(&self, targets: &[JobId]) -> SchedResult<Vec<StateChange>> {
        let in_flight: Vec<Job> = {
            let jobs = self.jobs.read().await;
            targets
                .iter()
                .filter_map(|id| jobs.get(id))
                .filter(|j| !j.is_terminal())
                .cloned()
                .collect()
        };
        if in_flight.is_empty() {
            return Ok(Vec::new());
        }

        let refs: Vec<&Job> = in_flight.iter().collect();
        let command = self.system.status_command(&refs);
        let output = self.execute(&command).await?;
        if !output.success() && !self.system.status_failure_is_benign(&output) {
            return Err(SchedError::Command {
                command,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let mut reported: FxHashMap<String, NativeStatus> = self
            .system
            .parse_status(&output.stdout)
            .into_iter()
            .map(|(id, status)| (self.system.job_key(&id), status))
            .collect();

        let missing: Vec<&Job> = in_flight
            .iter()
            .filter(|j| !reported.contains_key(&self.system.job_key(j.id.as_str())))
            .collect();
        if !missing.is_empty() {
            if let Some(history) = self.system.history_command(&missing) {
                match self.execute(&history).await {
                    Ok(out) if out.success() => {
                        for (id, status) in self.system.parse_history(&out.stdout) {
                            reported.entry(self.system.job_key(&id)).or_insert(status);
                        }
                    }
                    Ok(out) => warn!(
                        provider = %self.label,
                        exit_code = out.exit_code,
                        stderr = %out.stderr.trim(),
                        "History query failed"
                    ),
                    Err(e) => warn!(provider = %self.label, error = %e, "History query failed"),
                }
            }
        }

        let mut changes = Vec::new();
        let mut jobs = self.jobs.write().await;
        for polled in &in_flight {
            // Released while the backend was being queried.
            let Some(job) = jobs.get_mut(&polled.id) else {
                continue;
            };
            let from = job.state;
            let changed = match reported.get(&self.system.job_key(polled.id.as_str())) {
                Some(status) => {
                    let (state, reason) = status.resolve(polled.id.as_str());
                    apply(job, state, reason)
                }
                None => {
                    let state = self.system.missing_state();
                    apply(
                        job,
                        state,
                        Some("job no longer reported by the backend".to_string()),
                    )
                }
            };
            if changed {
                debug!(
                    provider = %self.label,
                    job_id = %job.id,
                    from = %from,
                    to = %job.state,
                    "Job state changed"
                );
                changes.push(StateChange {
                    job_id: job.id.clone(),
                    from,
                    to: job.state,
                });
            }
        }

        Ok(changes)
    }
}

/// Advance `job`, recording `reason` when the new state is a failure.
fn apply(job: &mut Job, state: JobState, reason: Option<String>) -> bool {
    match (state, reason) {
        (JobState::Failed, Some(reason)) => job.fail(reason),
        (state, _) => job.advance(state),
    }
}

impl ClusterProvider<LocalFork> {
    /// Local provider whose scripts live in `script_dir`.
    pub async fn local(script_dir: impl AsRef<Path>) -> SchedResult<Self> {
        let script_dir = script_dir.as_ref();
        let channel = LocalChannel::new(script_dir).await?;
        let settings = ProviderSettings {
            staging_dir: script_dir.to_path_buf(),
            ..ProviderSettings::default()
        };
        Ok(Self::new(LocalFork, Arc::new(channel)).with_settings(settings))
    }
}

#[async_trait]
impl<S: BatchSystem> Provider for ClusterProvider<S> {
    fn label(&self) -> &str {
        &self.label
    }

    async fn submit_named(
        &self,
        command: &str,
        spec: &ResourceSpec,
        name: Option<&str>,
    ) -> SchedResult<JobId> {
        self.check_capacity().await?;

        // Rejected specs never reach the channel.
        let wrapped = self.launcher.wrap(command, spec)?;

        let short = uuid::Uuid::new_v4().simple().to_string();
        let job_name = sanitize_name(&format!(
            "bp.{}.{}",
            name.unwrap_or("job"),
            &short[..8]
        ));

        let script_dir = self.channel.lock().await.script_dir().to_path_buf();
        let script_path = script_dir.join(format!("{job_name}.submit"));
        let stdout_path = script_dir.join(format!("{job_name}.stdout"));
        let stderr_path = script_dir.join(format!("{job_name}.stderr"));
        let prelude = self.settings.prelude();

        let ctx = ScriptContext {
            job_name: &job_name,
            command: &wrapped,
            resources: spec,
            script_dir: &script_dir,
            script_path: &script_path,
            stdout_path: &stdout_path,
            stderr_path: &stderr_path,
            prelude: &prelude,
        };
        let staged = self.write_staged(self.system.stage(&ctx)).await?;
        let submit_command = self.system.submit_command(&ctx);

        let mut template = Job::new(
            JobId::from(""),
            self.label.clone(),
            job_name.clone(),
            command,
            spec.clone(),
        );
        template.script_path = Some(script_path.clone());
        template.stdout_path = Some(stdout_path.clone());
        template.stderr_path = Some(stderr_path.clone());

        let job_id = self
            .settings
            .retry
            .run("submit", || {
                self.submit_once(&staged, &submit_command, &template)
            })
            .await?;

        info!(
            provider = %self.label,
            job_id = %job_id,
            job_name = %job_name,
            "Job submitted"
        );
        Ok(job_id)
    }

    async fn status(&self, job_ids: &[JobId]) -> SchedResult<FxHashMap<JobId, JobState>> {
        {
            let jobs = self.jobs.read().await;
            if let Some(unknown) = job_ids.iter().find(|id| !jobs.contains_key(*id)) {
                return Err(SchedError::JobNotFound(unknown.to_string()));
            }
        }

        self.poll(job_ids).await?;

        let jobs = self.jobs.read().await;
        job_ids
            .iter()
            .map(|id| {
                jobs.get(id)
                    .map(|j| (id.clone(), j.state))
                    .ok_or_else(|| SchedError::JobNotFound(id.to_string()))
            })
            .collect()
    }

    /// Targets are polled first, so a job that already finished keeps its
    /// real outcome and is answered with a cancellation error.
    async fn cancel_many(&self, job_ids: &[JobId]) -> Vec<(JobId, SchedResult<()>)> {
        let mut results: Vec<(JobId, SchedResult<()>)> = Vec::with_capacity(job_ids.len());
        let mut candidates: Vec<JobId> = Vec::new();
        {
            let jobs = self.jobs.read().await;
            for id in job_ids {
                match jobs.get(id) {
                    None => results.push((id.clone(), Err(SchedError::JobNotFound(id.to_string())))),
                    Some(_) => candidates.push(id.clone()),
                }
            }
        }
        if candidates.is_empty() {
            return results;
        }

        if let Err(e) = self.poll(&candidates).await {
            warn!(provider = %self.label, error = %e, "Status check before cancel failed");
        }

        let mut targets: Vec<JobId> = Vec::with_capacity(candidates.len());
        {
            let jobs = self.jobs.read().await;
            for id in candidates {
                match jobs.get(&id) {
                    None => results.push((id.clone(), Err(SchedError::JobNotFound(id.to_string())))),
                    Some(job) if job.is_terminal() => {
                        let err = SchedError::cancellation(&id, format!("job already {}", job.state));
                        results.push((id, Err(err)));
                    }
                    Some(_) => targets.push(id),
                }
            }
        }
        if targets.is_empty() {
            return results;
        }

        let refs: Vec<&JobId> = targets.iter().collect();
        let command = self.system.cancel_command(&refs);
        let failure = match self.execute(&command).await {
            Ok(output) if output.success() => None,
            Ok(output) => Some(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            warn!(provider = %self.label, reason = %reason, "Cancel rejected by backend");
            for id in targets {
                let err = SchedError::cancellation(&id, reason.clone());
                results.push((id, Err(err)));
            }
            return results;
        }

        let mut jobs = self.jobs.write().await;
        for id in targets {
            let result = match jobs.get_mut(&id) {
                Some(job) => {
                    if job.advance(JobState::Cancelled) {
                        info!(provider = %self.label, job_id = %id, "Job cancelled");
                        Ok(())
                    } else {
                        Err(SchedError::cancellation(
                            &id,
                            format!("job already {}", job.state),
                        ))
                    }
                }
                None => Err(SchedError::JobNotFound(id.to_string())),
            };
            results.push((id, result));
        }
        results
    }

    async fn refresh(&self) -> SchedResult<Vec<StateChange>> {
        let ids: Vec<JobId> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| !j.is_terminal())
            .map(|j| j.id.clone())
            .collect();
        self.poll(&ids).await
    }

    async fn track(&self, job: Job) {
        debug!(provider = %self.label, job_id = %job.id, state = %job.state, "Tracking job");
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    async fn job(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    async fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        jobs
    }

    async fn release(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.write().await.remove(job_id)
    }

    async fn sweep(&self, retention: Duration) -> Vec<Job> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - retention;

        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|j| j.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.id.clone())
            .collect();
        let swept: Vec<Job> = expired.iter().filter_map(|id| jobs.remove(id)).collect();
        if !swept.is_empty() {
            debug!(provider = %self.label, count = swept.len(), "Swept finished jobs");
        }
        swept
    }

    async fn close(&self) -> SchedResult<()> {
        let channel = self.channel.lock().await;
        Ok(channel.close().await?)
    }
}
