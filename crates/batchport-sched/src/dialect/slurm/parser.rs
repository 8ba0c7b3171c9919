//! Parsers for SLURM command output.

use rustc_hash::FxHashMap;

use crate::dialect::slurm::SlurmState;
use crate::error::{SchedError, SchedResult};
use crate::native::{NativeState, NativeStatus};

/// Parse sbatch output to extract job ID.
///
/// sbatch output format: "Submitted batch job 12345", optionally followed
/// by " on cluster <name>" on federated setups.
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("Submitted batch job ") {
            let job_id = rest.split_whitespace().next().unwrap_or("");
            if !job_id.is_empty() && job_id.chars().all(|c| c.is_ascii_digit()) {
                return Ok(job_id.to_string());
            }
        }
    }

    Err(SchedError::Submission(format!(
        "unexpected sbatch output: {}",
        output.trim()
    )))
}

/// Parse squeue output.
///
/// Expected format (from `squeue --noheader -o '%i|%t|%r'`):
/// ```text
/// 12345|R|None
/// 12346|PD|Resources
/// ```
pub fn parse_squeue_output(output: &str) -> FxHashMap<String, NativeStatus> {
    let mut statuses = FxHashMap::default();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 2 {
            tracing::debug!(line, "Skipping malformed squeue line");
            continue;
        }

        let state = parse_slurm_state(parts[1]);
        let reason = parts
            .get(2)
            .map(|r| r.trim())
            .filter(|r| *r != "None")
            .map(str::to_string);

        statuses.insert(
            parts[0].trim().to_string(),
            NativeStatus::new(NativeState::Slurm(state)).with_reason(reason),
        );
    }

    statuses
}

/// Parse sacct output for finished jobs.
///
/// Expected format (from `sacct -n -P -o JobID,State,ExitCode`):
/// ```text
/// 12345|COMPLETED|0:0
/// 12345.batch|COMPLETED|0:0
/// 12346|CANCELLED by 1000|0:15
/// ```
/// Job steps (ids containing a `.`) are skipped.
pub fn parse_sacct_output(output: &str) -> FxHashMap<String, NativeStatus> {
    let mut statuses = FxHashMap::default();

    for line in output.lines() {
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() < 3 {
            continue;
        }

        let job_id = parts[0].trim();
        if job_id.is_empty() || job_id.contains('.') {
            continue;
        }

        let state_word = parts[1].split_whitespace().next().unwrap_or("");
        let state = parse_slurm_state(state_word);
        let exit_code = parts[2]
            .split(':')
            .next()
            .and_then(|c| c.trim().parse::<i32>().ok());

        statuses.insert(
            job_id.to_string(),
            NativeStatus::new(NativeState::Slurm(state)).with_exit_code(exit_code),
        );
    }

    statuses
}

/// Parse a SLURM state string (compact or long form).
pub fn parse_slurm_state(s: &str) -> SlurmState {
    match s.trim().to_uppercase().as_str() {
        "PD" | "PENDING" => SlurmState::Pending,
        "CF" | "CONFIGURING" => SlurmState::Configuring,
        "RQ" | "RH" | "RS" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESIZING" => {
            SlurmState::Requeued
        }
        "R" | "RUNNING" => SlurmState::Running,
        "CG" | "COMPLETING" => SlurmState::Completing,
        "S" | "ST" | "SUSPENDED" | "STOPPED" => SlurmState::Suspended,
        "CD" | "COMPLETED" => SlurmState::Completed,
        "F" | "FAILED" => SlurmState::Failed,
        "TO" | "TIMEOUT" => SlurmState::Timeout,
        "CA" | "CANCELLED" => SlurmState::Cancelled,
        "NF" | "NODE_FAIL" => SlurmState::NodeFail,
        "PR" | "PREEMPTED" => SlurmState::Preempted,
        "OOM" | "OUT_OF_MEMORY" => SlurmState::OutOfMemory,
        "BF" | "BOOT_FAIL" => SlurmState::BootFail,
        "DL" | "DEADLINE" => SlurmState::Deadline,
        "RV" | "REVOKED" => SlurmState::Revoked,
        "SE" | "SPECIAL_EXIT" => SlurmState::SpecialExit,
        other => SlurmState::Unknown(other.to_string()),
    }
}
