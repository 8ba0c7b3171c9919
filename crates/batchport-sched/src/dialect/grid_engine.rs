//! Grid Engine dialect (SGE/UGE/OGE): `qsub -terse`, `qstat`, `qdel`.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::dialect::{
    BatchSystem, ScriptContext, join_ids, push_body, push_overrides, quote_path, shell_quote,
};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobState};
use crate::native::{NativeState, NativeStatus};

/// Grid Engine job state, classified from the `state` column code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridEngineState {
    /// `qw`, `Rq`
    Queued,
    /// `hqw`, `hRwq`
    Held,
    /// `r`, `Rr`
    Running,
    /// `t`, `Rt`
    Transferring,
    /// `s`, `S`, `ts`, `T`
    Suspended,
    /// `Eqw`, `Ehqw`, `EhRqw`
    Error,
    /// `d`, `dr`, `dt`, `drt`, `ds`, `drs`
    Deleted,
    Unknown(String),
}

impl GridEngineState {
    /// Classify a state code. Codes combine letters: `d` deleted, `E`
    /// error, `h` hold, `q`/`w` queued, `R` restarted, `r` running, `t`
    /// transferring, `s`/`S`/`T` suspended.
    pub fn parse(code: &str) -> Self {
        let code = code.trim();
        if code.is_empty() {
            return GridEngineState::Unknown(code.to_string());
        }
        if code.contains('d') {
            GridEngineState::Deleted
        } else if code.contains('E') {
            GridEngineState::Error
        } else if code.contains('q') || code.contains('w') {
            if code.contains('h') {
                GridEngineState::Held
            } else {
                GridEngineState::Queued
            }
        } else if code.contains(['s', 'S', 'T']) {
            GridEngineState::Suspended
        } else if code.contains('t') {
            GridEngineState::Transferring
        } else if code.contains('r') {
            GridEngineState::Running
        } else {
            GridEngineState::Unknown(code.to_string())
        }
    }

    /// Map to the normalized lifecycle.
    pub fn normalize(&self) -> Option<JobState> {
        match self {
            GridEngineState::Queued | GridEngineState::Held => Some(JobState::Pending),
            GridEngineState::Running
            | GridEngineState::Transferring
            | GridEngineState::Suspended => Some(JobState::Running),
            GridEngineState::Error => Some(JobState::Failed),
            GridEngineState::Deleted => Some(JobState::Done),
            GridEngineState::Unknown(_) => None,
        }
    }
}

impl fmt::Display for GridEngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridEngineState::Queued => f.write_str("qw"),
            GridEngineState::Held => f.write_str("hqw"),
            GridEngineState::Running => f.write_str("r"),
            GridEngineState::Transferring => f.write_str("t"),
            GridEngineState::Suspended => f.write_str("s"),
            GridEngineState::Error => f.write_str("Eqw"),
            GridEngineState::Deleted => f.write_str("d"),
            GridEngineState::Unknown(s) => f.write_str(s),
        }
    }
}

/// Grid Engine settings.
#[derive(Debug, Clone)]
pub struct GridEngine {
    /// Parallel environment for multi-slot jobs.
    pub parallel_environment: String,
}

impl Default for GridEngine {
    fn default() -> Self {
        Self {
            parallel_environment: "smp".to_string(),
        }
    }
}

impl BatchSystem for GridEngine {
    fn name(&self) -> &'static str {
        "gridengine"
    }

    fn render_script(&self, ctx: &ScriptContext<'_>) -> String {
        let res = ctx.resources;
        let mut script = String::new();

        script.push_str("#!/bin/bash\n");
        script.push_str("#$ -S /bin/bash\n");
        script.push_str(&format!("#$ -N {}\n", ctx.job_name));
        script.push_str(&format!("#$ -o {}\n", ctx.stdout_path.display()));
        script.push_str(&format!("#$ -e {}\n", ctx.stderr_path.display()));
        script.push_str("#$ -cwd\n");
        script.push_str(&format!("#$ -l h_rt={}\n", res.walltime));
        if res.total_cores() > 1 {
            script.push_str(&format!(
                "#$ -pe {} {}\n",
                self.parallel_environment,
                res.total_cores()
            ));
        }
        if let Some(mem) = res.memory_mb {
            script.push_str(&format!("#$ -l h_vmem={}M\n", mem));
        }
        push_overrides(&mut script, &res.overrides);

        push_body(&mut script, ctx);
        script
    }

    fn submit_command(&self, ctx: &ScriptContext<'_>) -> String {
        let mut cmd = String::from("qsub -terse");
        if let Some(ref queue) = ctx.resources.queue {
            cmd.push_str(&format!(" -q {}", shell_quote(queue)));
        }
        if let Some(ref account) = ctx.resources.account {
            cmd.push_str(&format!(" -P {}", shell_quote(account)));
        }
        cmd.push(' ');
        cmd.push_str(&quote_path(ctx.script_path));
        cmd
    }

    /// `-terse` prints the id alone, or `id.first-last:step` for arrays.
    fn parse_submit(&self, stdout: &str) -> SchedResult<JobId> {
        let line = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        let id = line.split('.').next().unwrap_or("");
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
            return Ok(JobId::from(id));
        }
        Err(SchedError::Submission(format!(
            "unexpected qsub output: {}",
            stdout.trim()
        )))
    }

    fn status_command(&self, _jobs: &[&Job]) -> String {
        "qstat".to_string()
    }

    /// ```text
    /// job-ID  prior   name  user   state submit/start at     queue  slots
    /// -----------------------------------------------------------------
    ///     42 0.55500 bp-1  alice  r     01/15/2024 10:30:00 all.q@n1  1
    /// ```
    fn parse_status(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        let mut statuses = FxHashMap::default();

        for line in stdout.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5
                || parts[0].eq_ignore_ascii_case("job-id")
                || parts[0].starts_with("---")
            {
                continue;
            }
            statuses.insert(
                parts[0].to_string(),
                NativeStatus::new(NativeState::GridEngine(GridEngineState::parse(parts[4]))),
            );
        }

        statuses
    }

    fn cancel_command(&self, ids: &[&JobId]) -> String {
        format!("qdel {}", join_ids(ids.iter().copied(), " "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::Paths;
    use batchport_launch::ResourceSpec;

    #[test]
    fn test_state_codes() {
        let cases = [
            ("qw", GridEngineState::Queued),
            ("hqw", GridEngineState::Held),
            ("hRwq", GridEngineState::Held),
            ("Rq", GridEngineState::Queued),
            ("Rqw", GridEngineState::Queued),
            ("r", GridEngineState::Running),
            ("Rr", GridEngineState::Running),
            ("t", GridEngineState::Transferring),
            ("Rt", GridEngineState::Transferring),
            ("S", GridEngineState::Suspended),
            ("T", GridEngineState::Suspended),
            ("s", GridEngineState::Suspended),
            ("ts", GridEngineState::Suspended),
            ("Eqw", GridEngineState::Error),
            ("EhRqw", GridEngineState::Error),
            ("dr", GridEngineState::Deleted),
            ("drs", GridEngineState::Deleted),
        ];
        for (code, expected) in cases {
            assert_eq!(GridEngineState::parse(code), expected, "code {code}");
        }
        assert!(matches!(
            GridEngineState::parse("R"),
            GridEngineState::Unknown(_)
        ));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(GridEngineState::Held.normalize(), Some(JobState::Pending));
        assert_eq!(GridEngineState::Transferring.normalize(), Some(JobState::Running));
        assert_eq!(GridEngineState::Error.normalize(), Some(JobState::Failed));
        assert_eq!(GridEngineState::Deleted.normalize(), Some(JobState::Done));
    }

    #[test]
    fn test_parse_submit_terse() {
        let ge = GridEngine::default();
        assert_eq!(ge.parse_submit("4242\n").unwrap(), JobId::from("4242"));
        assert_eq!(ge.parse_submit("4243.1-10:1\n").unwrap(), JobId::from("4243"));
        assert!(ge.parse_submit("Unable to run job").is_err());
    }

    #[test]
    fn test_parse_status() {
        let output = "job-ID  prior   name  user   state submit/start at     queue  slots ja-task-ID\n\
                      -----------------------------------------------------------------\n\
                      \x20   42 0.55500 bp-1  alice  r     01/15/2024 10:30:00 all.q@n1  1\n\
                      \x20   43 0.00000 bp-2  alice  qw    01/15/2024 10:31:00           1\n";
        let statuses = GridEngine::default().parse_status(output);
        assert_eq!(statuses.len(), 2);
        assert_eq!(
            statuses["42"].state,
            NativeState::GridEngine(GridEngineState::Running)
        );
        assert_eq!(
            statuses["43"].state,
            NativeState::GridEngine(GridEngineState::Queued)
        );
    }

    #[test]
    fn test_render_parallel_environment() {
        let resources = ResourceSpec::new().with_tasks_per_node(8);
        let paths = Paths::new("bp-ge");
        let script = GridEngine::default().render_script(&paths.ctx("bp-ge", "./run", &resources));
        assert!(script.contains("#$ -N bp-ge\n"));
        assert!(script.contains("#$ -l h_rt=00:10:00\n"));
        assert!(script.contains("#$ -pe smp 8\n"));

        let single = ResourceSpec::new();
        let script = GridEngine::default().render_script(&paths.ctx("bp-ge", "./run", &single));
        assert!(!script.contains("-pe"));
    }
}
