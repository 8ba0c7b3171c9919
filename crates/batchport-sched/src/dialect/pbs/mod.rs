//! PBS/Torque dialect: `qsub`, `qstat`, `qdel`.

mod parser;
mod templates;

use std::fmt;

use batchport_channel::ExecOutput;
use rustc_hash::FxHashMap;

use crate::dialect::{BatchSystem, ScriptContext, join_ids, quote_path, shell_quote};
use crate::error::SchedResult;
use crate::job::{Job, JobId, JobState};
use crate::native::NativeStatus;

pub use parser::{parse_pbs_state, parse_qstat_brief_output, parse_qstat_full_output, parse_qsub_output};

/// PBS job state (`job_state` / the `S` column of `qstat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbsState {
    /// Q: queued, eligible to run.
    Queued,
    /// W: waiting for its execution time.
    Waiting,
    /// H: held.
    Held,
    /// T: being moved to a new location.
    Transit,
    /// R: running.
    Running,
    /// S: suspended.
    Suspended,
    /// E: exiting after having run.
    Exiting,
    /// C: completed (Torque).
    Completed,
    /// F: finished (PBS Pro, `qstat -x`).
    Finished,
    Unknown(String),
}

impl PbsState {
    /// Map to the normalized lifecycle.
    pub fn normalize(&self) -> Option<JobState> {
        match self {
            PbsState::Queued | PbsState::Waiting | PbsState::Held | PbsState::Transit => {
                Some(JobState::Pending)
            }
            PbsState::Running | PbsState::Suspended => Some(JobState::Running),
            PbsState::Exiting | PbsState::Completed | PbsState::Finished => Some(JobState::Done),
            PbsState::Unknown(_) => None,
        }
    }
}

impl fmt::Display for PbsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PbsState::Queued => "Q",
            PbsState::Waiting => "W",
            PbsState::Held => "H",
            PbsState::Transit => "T",
            PbsState::Running => "R",
            PbsState::Suspended => "S",
            PbsState::Exiting => "E",
            PbsState::Completed => "C",
            PbsState::Finished => "F",
            PbsState::Unknown(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// PBS/Torque settings.
#[derive(Debug, Clone)]
pub struct Pbs {
    /// PBS Pro only lists finished jobs with `qstat -x`. Torque keeps
    /// completed jobs in plain `qstat -f` and lacks `-x`.
    pub expanded_history: bool,
}

impl Pbs {
    pub fn new() -> Self {
        Self {
            expanded_history: true,
        }
    }

    /// Torque flavour.
    pub fn torque() -> Self {
        Self {
            expanded_history: false,
        }
    }
}

impl Default for Pbs {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchSystem for Pbs {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn render_script(&self, ctx: &ScriptContext<'_>) -> String {
        templates::generate_batch_script(ctx)
    }

    fn submit_command(&self, ctx: &ScriptContext<'_>) -> String {
        let mut cmd = String::from("qsub");
        if let Some(ref queue) = ctx.resources.queue {
            cmd.push_str(&format!(" -q {}", shell_quote(queue)));
        }
        if let Some(ref account) = ctx.resources.account {
            cmd.push_str(&format!(" -A {}", shell_quote(account)));
        }
        cmd.push(' ');
        cmd.push_str(&quote_path(ctx.script_path));
        cmd
    }

    fn parse_submit(&self, stdout: &str) -> SchedResult<JobId> {
        parse_qsub_output(stdout).map(JobId::from)
    }

    fn status_command(&self, jobs: &[&Job]) -> String {
        format!("qstat {}", join_ids(jobs.iter().map(|j| &j.id), " "))
    }

    /// Finished rows carry no exit status here, so they are left out and
    /// settled by the history query.
    fn parse_status(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        parse_qstat_brief_output(stdout)
    }

    fn status_failure_is_benign(&self, output: &ExecOutput) -> bool {
        output.stderr.contains("Unknown Job Id") || output.stderr.contains("Job has finished")
    }

    fn history_command(&self, jobs: &[&Job]) -> Option<String> {
        let flags = if self.expanded_history { "-x -f" } else { "-f" };
        Some(format!(
            "qstat {flags} {}",
            join_ids(jobs.iter().map(|j| &j.id), " ")
        ))
    }

    fn parse_history(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        parse_qstat_full_output(stdout)
    }

    fn cancel_command(&self, ids: &[&JobId]) -> String {
        format!("qdel {}", join_ids(ids.iter().copied(), " "))
    }

    /// `qstat` may print `12345.server` or a truncated form of it; the
    /// sequence number is the stable part.
    fn job_key(&self, id: &str) -> String {
        id.split('.').next().unwrap_or(id).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::{Paths, job};
    use batchport_launch::ResourceSpec;

    #[test]
    fn test_state_normalization() {
        assert_eq!(PbsState::Queued.normalize(), Some(JobState::Pending));
        assert_eq!(PbsState::Held.normalize(), Some(JobState::Pending));
        assert_eq!(PbsState::Running.normalize(), Some(JobState::Running));
        assert_eq!(PbsState::Exiting.normalize(), Some(JobState::Done));
        assert_eq!(PbsState::Completed.normalize(), Some(JobState::Done));
        assert_eq!(PbsState::Unknown("Z".into()).normalize(), None);
    }

    #[test]
    fn test_submit_command_options() {
        let resources = ResourceSpec::new().with_queue("debug").with_account("chm123");
        let paths = Paths::new("bp-1");
        let cmd = Pbs::new().submit_command(&paths.ctx("bp-1", "x", &resources));
        assert_eq!(
            cmd,
            "qsub -q debug -A chm123 /home/alice/.batchport/scripts/bp-1.submit"
        );
    }

    #[test]
    fn test_job_key_strips_server() {
        let pbs = Pbs::new();
        assert_eq!(pbs.job_key("12345.pbs-server"), "12345");
        assert_eq!(pbs.job_key("12345.pbs-serv"), "12345");
        assert_eq!(pbs.job_key("12345"), "12345");
    }

    #[test]
    fn test_history_flags() {
        let j = job("1.srv");
        assert_eq!(Pbs::new().history_command(&[&j]).unwrap(), "qstat -x -f 1.srv");
        assert_eq!(Pbs::torque().history_command(&[&j]).unwrap(), "qstat -f 1.srv");
    }
}
