//! Batch system dialects.
//!
//! A [`BatchSystem`] knows one scheduler family's scripts, commands and
//! output formats. It is pure: the provider runs the commands it renders
//! and hands back their output for parsing.

pub mod cobalt;
pub mod condor;
pub mod grid_engine;
pub mod local;
pub mod pbs;
pub mod slurm;

use std::path::{Path, PathBuf};

use batchport_channel::ExecOutput;
pub use batchport_channel::{quote_path, shell_quote};
use batchport_launch::ResourceSpec;
use rustc_hash::FxHashMap;

use crate::error::SchedResult;
use crate::job::{Job, JobId, JobState};
use crate::native::NativeStatus;

pub use cobalt::Cobalt;
pub use condor::Condor;
pub use grid_engine::GridEngine;
pub use local::LocalFork;
pub use pbs::Pbs;
pub use slurm::Slurm;

/// Inputs for rendering one job's submit script and command.
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    /// Sanitized job name.
    pub job_name: &'a str,
    /// Launcher-wrapped command.
    pub command: &'a str,
    /// Requested resources.
    pub resources: &'a ResourceSpec,
    /// Remote script directory.
    pub script_dir: &'a Path,
    /// Remote path of the submit script.
    pub script_path: &'a Path,
    /// Remote stdout path.
    pub stdout_path: &'a Path,
    /// Remote stderr path.
    pub stderr_path: &'a Path,
    /// Shell lines to run before the command (module loads, worker init).
    pub prelude: &'a str,
}

/// A file to place on the execution target before submitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub remote_path: PathBuf,
    pub contents: String,
}

/// One scheduler family's scripts, commands and parsers.
pub trait BatchSystem: Send + Sync + 'static {
    /// Short name, used as the default provider label.
    fn name(&self) -> &'static str;

    /// Render the submit script.
    fn render_script(&self, ctx: &ScriptContext<'_>) -> String;

    /// Files to stage before submitting. Defaults to the submit script.
    fn stage(&self, ctx: &ScriptContext<'_>) -> Vec<StagedFile> {
        vec![StagedFile {
            remote_path: ctx.script_path.to_path_buf(),
            contents: self.render_script(ctx),
        }]
    }

    /// Command that submits the staged script.
    fn submit_command(&self, ctx: &ScriptContext<'_>) -> String;

    /// Extract the job id from the submit command's stdout.
    fn parse_submit(&self, stdout: &str) -> SchedResult<JobId>;

    /// One command querying all of `jobs`.
    fn status_command(&self, jobs: &[&Job]) -> String;

    /// Parse status output into raw job id → native status.
    fn parse_status(&self, stdout: &str) -> FxHashMap<String, NativeStatus>;

    /// Whether a non-zero status exit only means some jobs have left the
    /// queue.
    fn status_failure_is_benign(&self, _output: &ExecOutput) -> bool {
        false
    }

    /// Command querying finished jobs that dropped out of the status output.
    fn history_command(&self, _jobs: &[&Job]) -> Option<String> {
        None
    }

    /// Parse history output.
    fn parse_history(&self, _stdout: &str) -> FxHashMap<String, NativeStatus> {
        FxHashMap::default()
    }

    /// One command cancelling all of `ids`.
    fn cancel_command(&self, ids: &[&JobId]) -> String;

    /// Key for matching ids across submit and status output.
    fn job_key(&self, id: &str) -> String {
        id.to_string()
    }

    /// State for a job missing from both status and history output.
    fn missing_state(&self) -> JobState {
        JobState::Done
    }
}

/// Restrict a job name to characters every scheduler accepts.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

/// Space-separated, quoted job ids.
pub(crate) fn join_ids<'a, I>(ids: I, sep: &str) -> String
where
    I: IntoIterator<Item = &'a JobId>,
{
    ids.into_iter()
        .map(|id| shell_quote(id.as_str()))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Append the script body shared by all dialects: the `JOBNAME` export
/// used by launchers, the prelude, then the wrapped command.
pub(crate) fn push_body(script: &mut String, ctx: &ScriptContext<'_>) {
    script.push('\n');
    script.push_str(&format!("export JOBNAME={}\n", shell_quote(ctx.job_name)));
    if !ctx.prelude.trim().is_empty() {
        script.push_str(ctx.prelude.trim_end());
        script.push('\n');
    }
    script.push('\n');
    script.push_str(ctx.command);
    if !ctx.command.ends_with('\n') {
        script.push('\n');
    }
}

/// Append raw scheduler directives, one per line.
pub(crate) fn push_overrides(script: &mut String, overrides: &str) {
    for line in overrides.lines().map(str::trim).filter(|l| !l.is_empty()) {
        script.push_str(line);
        script.push('\n');
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct Paths {
        pub dir: PathBuf,
        pub script: PathBuf,
        pub stdout: PathBuf,
        pub stderr: PathBuf,
    }

    impl Paths {
        pub fn new(name: &str) -> Self {
            let dir = PathBuf::from("/home/alice/.batchport/scripts");
            Self {
                script: dir.join(format!("{name}.submit")),
                stdout: dir.join(format!("{name}.stdout")),
                stderr: dir.join(format!("{name}.stderr")),
                dir,
            }
        }

        pub fn ctx<'a>(
            &'a self,
            name: &'a str,
            command: &'a str,
            resources: &'a ResourceSpec,
        ) -> ScriptContext<'a> {
            ScriptContext {
                job_name: name,
                command,
                resources,
                script_dir: &self.dir,
                script_path: &self.script,
                stdout_path: &self.stdout,
                stderr_path: &self.stderr,
                prelude: "module load python",
            }
        }
    }

    pub fn job(id: &str) -> Job {
        let mut job = Job::new(JobId::from(id), "test", "bp-test", "echo hi", ResourceSpec::new());
        job.script_path = Some(PathBuf::from(format!("/tmp/scripts/{id}.submit")));
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my job/1"), "my_job_1");
        assert_eq!(sanitize_name(&"x".repeat(100)).len(), 64);
    }

    #[test]
    fn test_push_body() {
        let resources = ResourceSpec::new();
        let paths = test_support::Paths::new("bp-1");
        let ctx = paths.ctx("bp-1", "echo hello", &resources);
        let mut script = String::new();
        push_body(&mut script, &ctx);
        assert_eq!(
            script,
            "\nexport JOBNAME=bp-1\nmodule load python\n\necho hello\n"
        );
    }
}
