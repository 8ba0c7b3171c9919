//! Submit command implementation.

use anyhow::{Context, Result};
use console::style;

use batchport_launch::{ResourceSpec, Walltime};
use batchport_sched::Config;
use batchport_sched::dialect::shell_quote;

use super::common::Session;
use super::wait;
use crate::cli::SubmitArgs;

/// Resources for a submission: the configured defaults with any
/// command-line overrides applied.
pub fn resources(defaults: &ResourceSpec, args: &SubmitArgs) -> Result<ResourceSpec> {
    let mut spec = defaults.clone();
    if let Some(nodes) = args.nodes {
        spec = spec.with_nodes(nodes);
    }
    if let Some(tasks) = args.tasks_per_node {
        spec = spec.with_tasks_per_node(tasks);
    }
    if let Some(cores) = args.cores_per_task {
        spec = spec.with_cores_per_task(cores);
    }
    if let Some(memory) = args.memory_mb {
        spec = spec.with_memory_mb(memory);
    }
    if let Some(ref walltime) = args.walltime {
        let walltime: Walltime = walltime.parse()?;
        spec = spec.with_walltime(walltime);
    }
    if let Some(ref queue) = args.queue {
        spec = spec.with_queue(queue.clone());
    }
    if let Some(ref account) = args.account {
        spec = spec.with_account(account.clone());
    }
    Ok(spec)
}

/// The shell command line for the trailing arguments. A lone argument is
/// taken as written; several keep their boundaries.
pub fn command_line(args: &[String]) -> String {
    match args {
        [single] => single.clone(),
        many => many
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Execute the submit command.
pub async fn execute(config: Config, args: SubmitArgs) -> Result<()> {
    let spec = resources(&config.provider.resources, &args)?;
    let command = command_line(&args.command);

    let session = Session::open(config).await?;
    println!(
        "{} Submitting {} via {}",
        style("→").cyan().bold(),
        style(&command).green(),
        style(session.provider.label()).magenta()
    );

    let job_id = session
        .provider
        .submit_named(&command, &spec, args.name.as_deref())
        .await
        .context("Submission failed")?;
    session.persist().await?;

    println!(
        "{} Submitted job {}",
        style("✓").green().bold(),
        style(&job_id).yellow()
    );
    println!(
        "  {} nodes × {} tasks, walltime {}",
        spec.nodes, spec.tasks_per_node, spec.walltime
    );

    if args.wait {
        wait::wait_for_job(&session, &job_id, args.timeout).await?;
    }

    session.close().await
}
