//! Status command implementation.

use anyhow::Result;
use console::style;

use batchport_sched::{Config, Job};

use super::common::{Session, parse_ids, print_job, print_job_table};

/// Execute the status command.
pub async fn execute(config: Config, job_ids: &[String], all: bool) -> Result<()> {
    let session = Session::open(config).await?;

    if job_ids.len() == 1 {
        let ids = parse_ids(job_ids);
        session.provider.status(&ids).await?;
        if let Some(job) = session.provider.job(&ids[0]).await {
            print_job(&job);
        }
        return session.close().await;
    }

    let ids = if job_ids.is_empty() {
        session
            .provider
            .jobs()
            .await
            .into_iter()
            .filter(|j| all || !j.is_terminal())
            .map(|j| j.id)
            .collect()
    } else {
        parse_ids(job_ids)
    };

    if ids.is_empty() {
        println!("No jobs found.");
        return session.close().await;
    }

    session.provider.status(&ids).await?;

    let mut jobs: Vec<Job> = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(job) = session.provider.job(id).await {
            jobs.push(job);
        }
    }

    println!("{} {} job(s):\n", style("→").cyan().bold(), jobs.len());
    print_job_table(&jobs);

    session.close().await
}
