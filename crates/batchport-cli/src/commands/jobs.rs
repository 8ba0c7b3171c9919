//! Jobs command implementation.
//!
//! Lists stored job records without contacting the backend.

use anyhow::{Context, Result};
use console::style;

use batchport_sched::{Config, JobStore, JsonStore};

use super::common::print_job_table;

/// Execute the jobs command.
pub async fn execute(config: Config, format: &str, clean: bool) -> Result<()> {
    let store = JsonStore::new(&config.state_dir)
        .await
        .context("Failed to open job store")?;

    if clean {
        let removed = store.cleanup_old_jobs(config.tracker.retention()).await?;
        println!(
            "{} Removed {} finished job record(s)",
            style("✓").green().bold(),
            removed
        );
    }

    let jobs = store.list_jobs().await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&jobs)?),
        "table" => {
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{} {} job(s):\n", style("→").cyan().bold(), jobs.len());
                print_job_table(&jobs);
            }
        }
        other => anyhow::bail!("Unknown format: '{other}'. Available: table, json"),
    }
    Ok(())
}
