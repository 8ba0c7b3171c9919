//! Watch command implementation.
//!
//! Runs the tracker in the foreground and prints every state change.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use console::style;
use tokio::sync::broadcast::error::RecvError;

use batchport_sched::{Config, JobTracker};

use super::common::{Session, styled_state};

/// Execute the watch command.
pub async fn execute(config: Config, interval: Option<u64>) -> Result<()> {
    let poll_interval = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.tracker.poll_interval());
    if poll_interval.is_zero() {
        anyhow::bail!("Interval must be greater than 0");
    }

    let session = Session::open(config).await?;
    if session.provider.jobs().await.iter().all(|j| j.is_terminal()) {
        println!("No jobs in flight.");
        return session.close().await;
    }

    let tracker = Arc::new(JobTracker::new().with_provider(session.provider.clone()));
    let mut events = tracker.subscribe();
    let handle = tracker.clone().start(poll_interval);

    println!(
        "{} Watching {} every {}s (Ctrl-C to stop)",
        style("→").cyan().bold(),
        style(session.provider.label()).magenta(),
        poll_interval.as_secs_f64()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!(
                        "  {}  {:<16}  {} → {}",
                        event.at.format("%H:%M:%S"),
                        style(&event.job_id).dim(),
                        styled_state(event.from),
                        styled_state(event.to)
                    );
                    session.persist().await?;
                    if session.provider.jobs().await.iter().all(|j| j.is_terminal()) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Watcher fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }
    }

    handle.shutdown().await;
    session.close().await
}
