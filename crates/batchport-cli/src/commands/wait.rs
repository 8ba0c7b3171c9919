//! Wait command implementation.
//!
//! Poll a job until it reaches a terminal state.

use std::time::{Duration, Instant};

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use batchport_sched::{Config, JobId};

use super::common::{Session, print_job, styled_state};

/// Execute the wait command.
pub async fn execute(config: Config, job_id: &str, timeout: u64) -> Result<()> {
    let session = Session::open(config).await?;
    let job_id = JobId::from(job_id.trim());
    let outcome = wait_for_job(&session, &job_id, timeout).await;
    session.close().await?;
    outcome
}

/// Poll `job_id` with a spinner until it finishes or `timeout` seconds
/// pass.
pub async fn wait_for_job(session: &Session, job_id: &JobId, timeout: u64) -> Result<()> {
    println!(
        "{} Waiting for job {} (timeout: {}s)",
        style("→").cyan().bold(),
        style(job_id).dim(),
        timeout
    );

    let spinner = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(spinner_style);
    }
    spinner.set_message("Waiting for job to finish...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let start = Instant::now();
    let timeout_duration = Duration::from_secs(timeout);
    let poll_interval = session.config.tracker.poll_interval();

    loop {
        let states = match session.provider.status(std::slice::from_ref(job_id)).await {
            Ok(states) => states,
            Err(e) => {
                spinner.finish_and_clear();
                return Err(anyhow::anyhow!("Failed to get status: {e}"));
            }
        };
        let Some(state) = states.get(job_id).copied() else {
            spinner.finish_and_clear();
            anyhow::bail!("Job {job_id} is not tracked");
        };
        session.persist().await?;

        spinner.set_message(format!("Status: {state} ..."));

        if state.is_terminal() {
            spinner.finish_and_clear();
            if let Some(job) = session.provider.job(job_id).await {
                print_job(&job);
            }
            if !state.is_success() {
                println!(
                    "{} Job finished with status: {}",
                    style("✗").red().bold(),
                    styled_state(state)
                );
            }
            return Ok(());
        }

        if start.elapsed() > timeout_duration {
            spinner.finish_and_clear();
            anyhow::bail!(
                "Timeout after {}s. Job {} is still {}. Use 'batchport status {}' to check later.",
                timeout,
                job_id,
                state,
                job_id
            );
        }

        tokio::time::sleep(poll_interval).await;
    }
}
