//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Batchport - submit and track jobs on batch schedulers
#[derive(Parser, Debug)]
#[command(name = "batchport")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to ~/.batchport/config.yaml)
    #[arg(short, long, global = true, env = "BATCHPORT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a shell command as a job
    Submit(SubmitArgs),

    /// Query job status
    Status {
        /// Job IDs (all tracked jobs if omitted)
        job_ids: Vec<String>,

        /// Include finished jobs
        #[arg(short, long)]
        all: bool,
    },

    /// Cancel jobs
    Cancel {
        /// Job IDs
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Wait for a job to finish
    Wait {
        /// Job ID
        job_id: String,

        /// Timeout in seconds
        #[arg(short, long, default_value = "86400")]
        timeout: u64,
    },

    /// Follow state changes until every tracked job has finished
    Watch {
        /// Seconds between polls (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// List tracked jobs
    Jobs {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Delete finished jobs older than the configured retention
        #[arg(long)]
        clean: bool,
    },

    /// Stop tracking jobs without cancelling them
    Release {
        /// Job IDs
        #[arg(required = true)]
        job_ids: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Base name for the job
    #[arg(short, long)]
    pub name: Option<String>,

    /// Number of nodes
    #[arg(long)]
    pub nodes: Option<u32>,

    /// Tasks per node
    #[arg(long)]
    pub tasks_per_node: Option<u32>,

    /// Cores per task
    #[arg(long)]
    pub cores_per_task: Option<u32>,

    /// Memory per node in megabytes
    #[arg(long)]
    pub memory_mb: Option<u64>,

    /// Wall time limit (HH:MM:SS)
    #[arg(long)]
    pub walltime: Option<String>,

    /// Queue or partition
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Account or project to charge
    #[arg(short, long)]
    pub account: Option<String>,

    /// Wait for the job to finish
    #[arg(short, long)]
    pub wait: bool,

    /// Timeout in seconds when waiting
    #[arg(long, default_value = "86400")]
    pub timeout: u64,

    /// Command to run. A single argument is run as a shell command line;
    /// several arguments are quoted and run as one command.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}
