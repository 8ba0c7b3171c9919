//! SLURM dialect: `sbatch`, `squeue`, `sacct`, `scancel`.

mod parser;
mod templates;

use std::fmt;

use batchport_channel::ExecOutput;
use rustc_hash::FxHashMap;

use crate::dialect::{BatchSystem, ScriptContext, join_ids, quote_path};
use crate::error::SchedResult;
use crate::job::{Job, JobId, JobState};
use crate::native::NativeStatus;

pub use parser::{parse_sacct_output, parse_sbatch_output, parse_slurm_state, parse_squeue_output};

/// SLURM job state, from either the compact (`%t`) or long (`%T`) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmState {
    Pending,
    Configuring,
    Requeued,
    Running,
    Completing,
    Suspended,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    NodeFail,
    Preempted,
    OutOfMemory,
    BootFail,
    Deadline,
    Revoked,
    SpecialExit,
    Unknown(String),
}

impl SlurmState {
    /// Map to the normalized lifecycle.
    pub fn normalize(&self) -> Option<JobState> {
        match self {
            SlurmState::Pending | SlurmState::Configuring | SlurmState::Requeued => {
                Some(JobState::Pending)
            }
            SlurmState::Running | SlurmState::Completing | SlurmState::Suspended => {
                Some(JobState::Running)
            }
            SlurmState::Completed => Some(JobState::Done),
            SlurmState::Cancelled => Some(JobState::Cancelled),
            SlurmState::Failed
            | SlurmState::Timeout
            | SlurmState::NodeFail
            | SlurmState::Preempted
            | SlurmState::OutOfMemory
            | SlurmState::BootFail
            | SlurmState::Deadline
            | SlurmState::Revoked
            | SlurmState::SpecialExit => Some(JobState::Failed),
            SlurmState::Unknown(_) => None,
        }
    }
}

impl fmt::Display for SlurmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlurmState::Pending => "PENDING",
            SlurmState::Configuring => "CONFIGURING",
            SlurmState::Requeued => "REQUEUED",
            SlurmState::Running => "RUNNING",
            SlurmState::Completing => "COMPLETING",
            SlurmState::Suspended => "SUSPENDED",
            SlurmState::Completed => "COMPLETED",
            SlurmState::Failed => "FAILED",
            SlurmState::Timeout => "TIMEOUT",
            SlurmState::Cancelled => "CANCELLED",
            SlurmState::NodeFail => "NODE_FAIL",
            SlurmState::Preempted => "PREEMPTED",
            SlurmState::OutOfMemory => "OUT_OF_MEMORY",
            SlurmState::BootFail => "BOOT_FAIL",
            SlurmState::Deadline => "DEADLINE",
            SlurmState::Revoked => "REVOKED",
            SlurmState::SpecialExit => "SPECIAL_EXIT",
            SlurmState::Unknown(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// SLURM-specific settings.
#[derive(Debug, Clone, Default)]
pub struct Slurm {
    /// Request whole nodes (`--exclusive`).
    pub exclusive: bool,
}

impl Slurm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchSystem for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn render_script(&self, ctx: &ScriptContext<'_>) -> String {
        templates::generate_batch_script(ctx, self.exclusive)
    }

    fn submit_command(&self, ctx: &ScriptContext<'_>) -> String {
        format!("sbatch {}", quote_path(ctx.script_path))
    }

    fn parse_submit(&self, stdout: &str) -> SchedResult<JobId> {
        parse_sbatch_output(stdout).map(JobId::from)
    }

    fn status_command(&self, jobs: &[&Job]) -> String {
        format!(
            "squeue --noheader -o '%i|%t|%r' -j {}",
            join_ids(jobs.iter().map(|j| &j.id), ",")
        )
    }

    fn parse_status(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        parse_squeue_output(stdout)
    }

    fn status_failure_is_benign(&self, output: &ExecOutput) -> bool {
        output.stderr.contains("Invalid job id")
    }

    fn history_command(&self, jobs: &[&Job]) -> Option<String> {
        Some(format!(
            "sacct -n -P -o JobID,State,ExitCode -j {}",
            join_ids(jobs.iter().map(|j| &j.id), ",")
        ))
    }

    fn parse_history(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        parse_sacct_output(stdout)
    }

    fn cancel_command(&self, ids: &[&JobId]) -> String {
        format!("scancel {}", join_ids(ids.iter().copied(), " "))
    }
}
