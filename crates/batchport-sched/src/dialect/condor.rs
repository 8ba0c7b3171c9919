//! HTCondor dialect: `condor_submit`, `condor_q`, `condor_history`, `condor_rm`.
//!
//! HTCondor separates the submit description from the executable, so each
//! job stages two files: `<name>.script` with the wrapped command and
//! `<name>.submit` describing how to run it.

use std::fmt;
use std::path::PathBuf;

use rustc_hash::FxHashMap;

use crate::dialect::{
    BatchSystem, ScriptContext, StagedFile, join_ids, push_body, push_overrides,
};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobState};
use crate::native::{NativeState, NativeStatus};

/// HTCondor `JobStatus` code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondorState {
    /// 1
    Idle,
    /// 2
    Running,
    /// 3
    Removed,
    /// 4
    Completed,
    /// 5
    Held,
    /// 6
    TransferringOutput,
    /// 7
    Suspended,
    Unknown(String),
}

impl CondorState {
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "1" => CondorState::Idle,
            "2" => CondorState::Running,
            "3" => CondorState::Removed,
            "4" => CondorState::Completed,
            "5" => CondorState::Held,
            "6" => CondorState::TransferringOutput,
            "7" => CondorState::Suspended,
            other => CondorState::Unknown(other.to_string()),
        }
    }

    /// Map to the normalized lifecycle. Held jobs need manual release and
    /// count as failed.
    pub fn normalize(&self) -> Option<JobState> {
        match self {
            CondorState::Idle => Some(JobState::Pending),
            CondorState::Running | CondorState::TransferringOutput | CondorState::Suspended => {
                Some(JobState::Running)
            }
            CondorState::Removed => Some(JobState::Cancelled),
            CondorState::Completed => Some(JobState::Done),
            CondorState::Held => Some(JobState::Failed),
            CondorState::Unknown(_) => None,
        }
    }
}

impl fmt::Display for CondorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CondorState::Idle => "idle",
            CondorState::Running => "running",
            CondorState::Removed => "removed",
            CondorState::Completed => "completed",
            CondorState::Held => "held",
            CondorState::TransferringOutput => "transferring_output",
            CondorState::Suspended => "suspended",
            CondorState::Unknown(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// HTCondor settings.
#[derive(Debug, Clone, Default)]
pub struct Condor {
    /// Environment passed to the job in addition to `JOBNAME`.
    pub environment: FxHashMap<String, String>,
    /// ClassAd `requirements` expression.
    pub requirements: Option<String>,
}

impl Condor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the executable staged next to the submit description.
    fn executable_path(ctx: &ScriptContext<'_>) -> PathBuf {
        ctx.script_path.with_extension("script")
    }

    /// Render the submit description.
    pub fn submit_description(&self, ctx: &ScriptContext<'_>) -> String {
        let res = ctx.resources;
        let mut desc = String::new();

        desc.push_str("universe = vanilla\n");
        desc.push_str(&format!(
            "executable = {}\n",
            Self::executable_path(ctx).display()
        ));
        desc.push_str(&format!("output = {}\n", ctx.stdout_path.display()));
        desc.push_str(&format!("error = {}\n", ctx.stderr_path.display()));
        desc.push_str(&format!(
            "log = {}\n",
            ctx.script_dir.join(format!("{}.log", ctx.job_name)).display()
        ));
        desc.push_str(&format!("request_cpus = {}\n", res.total_cores()));
        if let Some(mem) = res.memory_mb {
            desc.push_str(&format!("request_memory = {}\n", mem));
        }
        desc.push_str(&format!(
            "periodic_remove = JobStatus == 2 && (time() - EnterCurrentStatus) > {}\n",
            res.walltime.as_secs()
        ));
        if let Some(ref account) = res.account {
            desc.push_str(&format!("accounting_group = {}\n", account));
        }
        if let Some(ref requirements) = self.requirements {
            desc.push_str(&format!("requirements = {}\n", requirements));
        }
        desc.push_str(&format!(
            "environment = \"{}\"\n",
            self.environment_string(ctx.job_name)
        ));
        push_overrides(&mut desc, &res.overrides);
        desc.push_str("queue 1\n");
        desc
    }

    /// New-style `environment` value: space-separated `K='v'` pairs with
    /// quotes doubled.
    fn environment_string(&self, job_name: &str) -> String {
        let mut keys: Vec<&String> = self.environment.keys().collect();
        keys.sort();

        let mut pairs = vec![format!("JOBNAME={}", job_name)];
        for key in keys {
            let value = &self.environment[key];
            pairs.push(format!(
                "{}='{}'",
                key,
                value.replace('"', "\"\"").replace('\'', "''")
            ));
        }
        pairs.join(" ")
    }
}

impl BatchSystem for Condor {
    fn name(&self) -> &'static str {
        "condor"
    }

    /// The executable run by HTCondor.
    fn render_script(&self, ctx: &ScriptContext<'_>) -> String {
        let mut script = String::from("#!/bin/bash\n");
        push_body(&mut script, ctx);
        script
    }

    fn stage(&self, ctx: &ScriptContext<'_>) -> Vec<StagedFile> {
        vec![
            StagedFile {
                remote_path: Self::executable_path(ctx),
                contents: self.render_script(ctx),
            },
            StagedFile {
                remote_path: ctx.script_path.to_path_buf(),
                contents: self.submit_description(ctx),
            },
        ]
    }

    fn submit_command(&self, ctx: &ScriptContext<'_>) -> String {
        format!(
            "condor_submit {}",
            crate::dialect::quote_path(ctx.script_path)
        )
    }

    /// ```text
    /// Submitting job(s).
    /// 1 job(s) submitted to cluster 118908.
    /// ```
    fn parse_submit(&self, stdout: &str) -> SchedResult<JobId> {
        for line in stdout.lines() {
            if let Some((_, cluster)) = line.split_once("submitted to cluster") {
                let cluster = cluster.trim().trim_end_matches('.');
                if !cluster.is_empty() && cluster.chars().all(|c| c.is_ascii_digit()) {
                    return Ok(JobId::from(cluster));
                }
            }
        }
        Err(SchedError::Submission(format!(
            "unexpected condor_submit output: {}",
            stdout.trim()
        )))
    }

    fn status_command(&self, jobs: &[&Job]) -> String {
        format!(
            "condor_q {} -af:jr JobStatus",
            join_ids(jobs.iter().map(|j| &j.id), " ")
        )
    }

    /// ```text
    /// 34524642.0 2
    /// 34524643.0 1
    /// ```
    fn parse_status(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        parse_af_output(stdout)
    }

    fn history_command(&self, jobs: &[&Job]) -> Option<String> {
        Some(format!(
            "condor_history {} -af:jr JobStatus ExitCode",
            join_ids(jobs.iter().map(|j| &j.id), " ")
        ))
    }

    /// Same as status, with `ExitCode` (`undefined` for removed jobs).
    fn parse_history(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        parse_af_output(stdout)
    }

    /// `condor_rm -forcex` clears jobs already stuck in the removed state.
    fn cancel_command(&self, ids: &[&JobId]) -> String {
        let list = join_ids(ids.iter().copied(), " ");
        format!("condor_rm {list} && (condor_rm -forcex {list} > /dev/null 2>&1 || true)")
    }

    /// Ids are clusters; output rows carry `cluster.proc`.
    fn job_key(&self, id: &str) -> String {
        id.split('.').next().unwrap_or(id).to_string()
    }
}

fn parse_af_output(stdout: &str) -> FxHashMap<String, NativeStatus> {
    let mut statuses = FxHashMap::default();

    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let exit_code = parts.get(2).and_then(|c| c.parse::<i32>().ok());
        statuses.insert(
            parts[0].to_string(),
            NativeStatus::new(NativeState::Condor(CondorState::parse(parts[1])))
                .with_exit_code(exit_code),
        );
    }

    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::{Paths, job};
    use batchport_launch::ResourceSpec;

    #[test]
    fn test_state_codes() {
        assert_eq!(CondorState::parse("1").normalize(), Some(JobState::Pending));
        assert_eq!(CondorState::parse("2").normalize(), Some(JobState::Running));
        assert_eq!(CondorState::parse("3").normalize(), Some(JobState::Cancelled));
        assert_eq!(CondorState::parse("4").normalize(), Some(JobState::Done));
        assert_eq!(CondorState::parse("5").normalize(), Some(JobState::Failed));
        assert_eq!(CondorState::parse("7").normalize(), Some(JobState::Running));
        assert_eq!(CondorState::parse("9").normalize(), None);
    }

    #[test]
    fn test_parse_submit() {
        let out = "Submitting job(s).\n1 job(s) submitted to cluster 118908.\n";
        assert_eq!(Condor::new().parse_submit(out).unwrap(), JobId::from("118908"));
        assert!(Condor::new().parse_submit("ERROR: parse error").is_err());
    }

    #[test]
    fn test_stage_writes_script_and_description() {
        let resources = ResourceSpec::new()
            .with_cores_per_task(4)
            .with_memory_mb(2048)
            .with_account("group_physics");
        let paths = Paths::new("bp-condor");
        let mut condor = Condor::new();
        condor.environment.insert("OMP_NUM_THREADS".into(), "4".into());
        let files = condor.stage(&paths.ctx("bp-condor", "./sim", &resources));

        assert_eq!(files.len(), 2);
        assert_eq!(
            files[0].remote_path,
            PathBuf::from("/home/alice/.batchport/scripts/bp-condor.script")
        );
        assert!(files[0].contents.trim_end().ends_with("./sim"));

        let desc = &files[1].contents;
        assert_eq!(files[1].remote_path, paths.script);
        assert!(desc.contains("executable = /home/alice/.batchport/scripts/bp-condor.script\n"));
        assert!(desc.contains("request_cpus = 4\n"));
        assert!(desc.contains("request_memory = 2048\n"));
        assert!(desc.contains("accounting_group = group_physics\n"));
        assert!(desc.contains("environment = \"JOBNAME=bp-condor OMP_NUM_THREADS='4'\"\n"));
        assert!(desc.ends_with("queue 1\n"));
    }

    #[test]
    fn test_parse_status_and_history() {
        let condor = Condor::new();
        let statuses = condor.parse_status("34524642.0 2\n34524643.0 1\n");
        assert_eq!(
            statuses["34524642.0"].state,
            NativeState::Condor(CondorState::Running)
        );
        assert_eq!(condor.job_key("34524642.0"), "34524642");

        let history = condor.parse_history("7.0 4 1\n8.0 3 undefined\n");
        assert_eq!(history["7.0"].exit_code, Some(1));
        assert_eq!(history["8.0"].exit_code, None);
    }

    #[test]
    fn test_commands() {
        let condor = Condor::new();
        let a = job("7");
        let b = job("8");
        assert_eq!(condor.status_command(&[&a, &b]), "condor_q 7 8 -af:jr JobStatus");
        assert_eq!(
            condor.history_command(&[&a]).unwrap(),
            "condor_history 7 -af:jr JobStatus ExitCode"
        );
        assert!(condor.cancel_command(&[&a.id]).starts_with("condor_rm 7 &&"));
    }
}
