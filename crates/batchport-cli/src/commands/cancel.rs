//! Cancel command implementation.

use anyhow::Result;
use console::style;

use batchport_sched::Config;

use super::common::{Session, parse_ids};

/// Execute the cancel command. Fails if any job could not be cancelled.
pub async fn execute(config: Config, job_ids: &[String]) -> Result<()> {
    let session = Session::open(config).await?;
    let ids = parse_ids(job_ids);

    let results = session.provider.cancel_many(&ids).await;
    let mut failed = 0;
    for (id, result) in &results {
        match result {
            Ok(()) => println!(
                "{} Cancelled job {}",
                style("✓").green().bold(),
                style(id).yellow()
            ),
            Err(e) => {
                failed += 1;
                println!("{} {}", style("✗").red().bold(), e);
            }
        }
    }

    session.close().await?;
    if failed > 0 {
        anyhow::bail!("{failed} of {} job(s) could not be cancelled", results.len());
    }
    Ok(())
}
