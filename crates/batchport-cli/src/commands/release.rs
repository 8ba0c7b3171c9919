//! Release command implementation.

use anyhow::Result;
use console::style;

use batchport_sched::{Config, JobStore};

use super::common::{Session, parse_ids};

/// Execute the release command. Released jobs keep running but are no
/// longer tracked or stored.
pub async fn execute(config: Config, job_ids: &[String]) -> Result<()> {
    let session = Session::open(config).await?;
    let label = session.provider.label().to_string();

    for id in parse_ids(job_ids) {
        let tracked = session.provider.release(&id).await.is_some();
        let stored = session.store.delete_job(&label, &id).await?;
        if tracked || stored {
            println!("{} Released job {}", style("✓").green().bold(), style(&id).yellow());
        } else {
            println!("{} Job {} is not tracked", style("✗").red().bold(), id);
        }
    }

    session.close().await
}
