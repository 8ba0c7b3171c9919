//! Batchport Command-Line Interface
//!
//! Submits shell commands to the configured batch scheduler and keeps job
//! records under `~/.batchport/jobs` between invocations.
//!
//! ```text
//! batchport submit --nodes 2 --walltime 01:00:00 -- ./simulate.sh
//! batchport status
//! batchport wait 4242
//! batchport cancel 4242 4243
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use console::style;

mod cli;
mod commands;
mod logging;

use batchport_sched::Config;
use cli::{Cli, Commands};
use commands::{cancel, jobs, release, status, submit, wait, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(2);
        }
    };

    // Setup logging
    if let Err(e) = logging::init_tracing(&config.logging, cli.verbose) {
        eprintln!("{} {}", style("Warning:").yellow().bold(), e);
    }

    // Execute command
    let result = match cli.command {
        Commands::Submit(args) => submit::execute(config, args).await,
        Commands::Status { job_ids, all } => status::execute(config, &job_ids, all).await,
        Commands::Cancel { job_ids } => cancel::execute(config, &job_ids).await,
        Commands::Wait { job_id, timeout } => wait::execute(config, &job_id, timeout).await,
        Commands::Watch { interval } => watch::execute(config, interval).await,
        Commands::Jobs { format, clean } => jobs::execute(config, &format, clean).await,
        Commands::Release { job_ids } => release::execute(config, &job_ids).await,
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
