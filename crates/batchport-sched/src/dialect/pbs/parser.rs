//! Parsers for PBS command output.

use rustc_hash::FxHashMap;

use crate::dialect::pbs::PbsState;
use crate::error::{SchedError, SchedResult};
use crate::native::{NativeState, NativeStatus};

/// Parse qsub output to extract job ID.
///
/// qsub output format varies by PBS implementation:
/// - PBS Pro: "12345.pbs-server"
/// - Torque: "12345.server.domain.com"
/// - Some sites: just "12345"
///
/// The first non-empty line is the job id.
pub fn parse_qsub_output(output: &str) -> SchedResult<String> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");

    let sequence = line.split('.').next().unwrap_or("");
    if !sequence.is_empty()
        && sequence.chars().all(|c| c.is_ascii_digit() || c == '[' || c == ']')
        && !line.contains(char::is_whitespace)
    {
        return Ok(line.to_string());
    }

    Err(SchedError::Submission(format!(
        "unexpected qsub output: {}",
        output.trim()
    )))
}

/// Parse qstat brief output (default format). Exiting and finished rows
/// are skipped: the table has no exit status for them.
///
/// ```text
/// Job id            Name             User              Time Use S Queue
/// ----------------  ---------------- ----------------  -------- - -----
/// 12345.pbs-server  my_job           user              00:05:23 R batch
/// ```
pub fn parse_qstat_brief_output(output: &str) -> FxHashMap<String, NativeStatus> {
    let mut statuses = FxHashMap::default();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6
            || parts[0].to_uppercase().starts_with("JOB")
            || parts[0].starts_with("---")
        {
            continue;
        }

        let state = parse_pbs_state(parts[4]);
        if matches!(
            state,
            PbsState::Exiting | PbsState::Completed | PbsState::Finished
        ) {
            continue;
        }
        statuses.insert(
            parts[0].to_string(),
            NativeStatus::new(NativeState::Pbs(state)),
        );
    }

    statuses
}

/// Parse qstat full output (`-f`, possibly `-x`) for one or more jobs.
///
/// ```text
/// Job Id: 12345.pbs-server
///     Job_Name = my_job
///     job_state = F
///     Exit_status = 0
///
/// Job Id: 12346.pbs-server
///     ...
/// ```
pub fn parse_qstat_full_output(output: &str) -> FxHashMap<String, NativeStatus> {
    let mut statuses = FxHashMap::default();

    let mut current: Option<String> = None;
    let mut state = PbsState::Unknown(String::new());
    let mut exit_status: Option<i32> = None;

    let mut flush = |id: Option<String>, state: PbsState, exit: Option<i32>| {
        if let Some(id) = id {
            statuses.insert(
                id,
                NativeStatus::new(NativeState::Pbs(state)).with_exit_code(exit),
            );
        }
    };

    for line in output.lines() {
        let line = line.trim();

        if let Some(id) = line.strip_prefix("Job Id:") {
            flush(
                current.take(),
                std::mem::replace(&mut state, PbsState::Unknown(String::new())),
                exit_status.take(),
            );
            current = Some(id.trim().to_string());
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "job_state" => state = parse_pbs_state(value.trim()),
                "Exit_status" | "exit_status" => exit_status = value.trim().parse().ok(),
                _ => {}
            }
        }
    }
    flush(current, state, exit_status);

    statuses
}

/// Parse a PBS state letter.
pub fn parse_pbs_state(s: &str) -> PbsState {
    match s.trim().to_uppercase().as_str() {
        "Q" => PbsState::Queued,
        "W" => PbsState::Waiting,
        "H" => PbsState::Held,
        "T" => PbsState::Transit,
        "R" | "B" => PbsState::Running,
        "S" | "U" => PbsState::Suspended,
        "E" | "X" => PbsState::Exiting,
        "C" => PbsState::Completed,
        "F" => PbsState::Finished,
        other => PbsState::Unknown(other.to_string()),
    }
}
