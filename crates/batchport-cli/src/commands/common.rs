//! Shared helpers for CLI commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::{StyledObject, style};

use batchport_sched::{Config, Job, JobId, JobState, JobStore, JsonStore, Provider};

/// The configured provider plus the on-disk job records it was restored
/// from.
pub struct Session {
    pub config: Config,
    pub provider: Arc<dyn Provider>,
    pub store: JsonStore,
}

impl Session {
    /// Open the provider and re-track every stored job it owns.
    pub async fn open(config: Config) -> Result<Self> {
        let store = JsonStore::new(&config.state_dir).await.with_context(|| {
            format!(
                "Failed to open job store in {}",
                config.state_dir.display()
            )
        })?;

        let provider = config
            .build_provider()
            .await
            .context("Failed to open provider")?;

        let mut restored = 0;
        for job in store.list_jobs().await? {
            if job.provider == provider.label() {
                provider.track(job).await;
                restored += 1;
            }
        }
        tracing::debug!(provider = provider.label(), restored, "Restored jobs");

        Ok(Self {
            config,
            provider,
            store,
        })
    }

    /// Write every tracked job back to the store.
    pub async fn persist(&self) -> Result<()> {
        for job in self.provider.jobs().await {
            self.store
                .save_job(&job)
                .await
                .with_context(|| format!("Failed to save job {}", job.id))?;
        }
        Ok(())
    }

    /// Persist and release the channel.
    pub async fn close(self) -> Result<()> {
        self.persist().await?;
        self.provider.close().await?;
        Ok(())
    }
}

/// Parse job id arguments.
pub fn parse_ids(ids: &[String]) -> Vec<JobId> {
    ids.iter().map(|id| JobId::from(id.trim())).collect()
}

/// Colour a state name.
pub fn styled_state(state: JobState) -> StyledObject<&'static str> {
    let name = state.as_str();
    match state {
        JobState::Done => style(name).green(),
        JobState::Failed | JobState::Cancelled => style(name).red(),
        JobState::Pending => style(name).yellow(),
        JobState::Running => style(name).cyan(),
    }
}

/// Print jobs as a table.
pub fn print_job_table(jobs: &[Job]) {
    println!(
        "  {:<16}  {:<28}  {:<10}  {:<12}  {}",
        style("JOB ID").bold(),
        style("NAME").bold(),
        style("STATE").bold(),
        style("PROVIDER").bold(),
        style("SUBMITTED").bold()
    );
    println!("  {}", "-".repeat(90));

    for job in jobs {
        println!(
            "  {:<16}  {:<28}  {:<10}  {:<12}  {}",
            style(&job.id).dim(),
            job.name,
            styled_state(job.state),
            job.provider,
            job.submitted_at.format("%Y-%m-%d %H:%M"),
        );
        if let Some(ref error) = job.error {
            println!("  {:<16}  {}", "", style(error).red().dim());
        }
    }
}

/// Print one job's details.
pub fn print_job(job: &Job) {
    println!(
        "{} Job {} on {}: {}",
        style("→").cyan().bold(),
        style(&job.id).dim(),
        style(&job.provider).magenta(),
        styled_state(job.state).bold()
    );
    println!("  Name:      {}", job.name);
    println!("  Command:   {}", job.command);
    println!("  Submitted: {}", job.submitted_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated:   {}", job.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ref path) = job.stdout_path {
        println!("  Stdout:    {}", path.display());
    }
    if let Some(ref path) = job.stderr_path {
        println!("  Stderr:    {}", path.display());
    }
    if let Some(ref error) = job.error {
        println!("  Error:     {}", style(error).red());
    }
}
