//! Fork dialect: runs the script in the background on the channel's host.
//!
//! The job id is the PID of a wrapper shell that runs the script and then
//! writes its exit code to `<script>.ec`. Status checks the exit-code file
//! and `kill -0` for every job in one shell loop.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::dialect::{BatchSystem, ScriptContext, push_body, quote_path, shell_quote};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobState};
use crate::native::{NativeState, NativeStatus};

/// State of a forked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
    Running,
    /// Exited with the recorded code.
    Exited(i32),
    /// Gone without an exit-code file.
    Vanished,
    Unknown(String),
}

impl LocalState {
    pub fn normalize(&self) -> Option<JobState> {
        match self {
            LocalState::Running => Some(JobState::Running),
            LocalState::Exited(_) => Some(JobState::Done),
            LocalState::Vanished => Some(JobState::Failed),
            LocalState::Unknown(_) => None,
        }
    }
}

impl fmt::Display for LocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalState::Running => f.write_str("running"),
            LocalState::Exited(code) => write!(f, "exited({code})"),
            LocalState::Vanished => f.write_str("vanished"),
            LocalState::Unknown(s) => f.write_str(s),
        }
    }
}

/// Background-process "scheduler".
#[derive(Debug, Clone, Default)]
pub struct LocalFork;

impl LocalFork {
    fn exit_code_path(script: &std::path::Path) -> String {
        format!("{}.ec", script.display())
    }
}

impl BatchSystem for LocalFork {
    fn name(&self) -> &'static str {
        "local"
    }

    fn render_script(&self, ctx: &ScriptContext<'_>) -> String {
        let mut script = String::from("#!/bin/bash\n");
        push_body(&mut script, ctx);
        script
    }

    /// The exit code is written to a temporary file and renamed so a
    /// status check never reads a partial value.
    fn submit_command(&self, ctx: &ScriptContext<'_>) -> String {
        let ec = Self::exit_code_path(ctx.script_path);
        let inner = format!(
            "cd {} && bash {} > {} 2> {}; echo $? > {ec}.tmp && mv {ec}.tmp {ec}",
            quote_path(ctx.script_dir),
            quote_path(ctx.script_path),
            quote_path(ctx.stdout_path),
            quote_path(ctx.stderr_path),
            ec = shell_quote(&ec),
        );
        format!(
            "nohup bash -c {} < /dev/null > /dev/null 2>&1 & echo $!",
            shell_quote(&inner)
        )
    }

    fn parse_submit(&self, stdout: &str) -> SchedResult<JobId> {
        let pid = stdout.lines().map(str::trim).rfind(|l| !l.is_empty()).unwrap_or("");
        if !pid.is_empty() && pid.chars().all(|c| c.is_ascii_digit()) {
            return Ok(JobId::from(pid));
        }
        Err(SchedError::Submission(format!(
            "expected a PID, got: {}",
            stdout.trim()
        )))
    }

    /// The exit-code file is checked on both sides of `kill -0` so a job
    /// finishing between the checks is still seen as exited.
    fn status_command(&self, jobs: &[&Job]) -> String {
        let entries: Vec<String> = jobs
            .iter()
            .map(|job| {
                let script = job
                    .script_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                shell_quote(&format!("{}:{}", job.id, script))
            })
            .collect();
        format!(
            "for entry in {}; do \
             pid=${{entry%%:*}}; ec=\"${{entry#*:}}.ec\"; \
             if [ -f \"$ec\" ]; then echo \"$pid EXIT $(cat \"$ec\")\"; \
             elif kill -0 \"$pid\" 2>/dev/null; then echo \"$pid RUNNING\"; \
             elif [ -f \"$ec\" ]; then echo \"$pid EXIT $(cat \"$ec\")\"; \
             else echo \"$pid MISSING\"; fi; \
             done",
            entries.join(" ")
        )
    }

    fn parse_status(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        let mut statuses = FxHashMap::default();

        for line in stdout.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let (Some(pid), Some(word)) = (parts.first(), parts.get(1)) else {
                continue;
            };
            let status = match *word {
                "RUNNING" => NativeStatus::new(NativeState::Local(LocalState::Running)),
                "EXIT" => match parts.get(2).and_then(|c| c.parse::<i32>().ok()) {
                    Some(code) => NativeStatus::new(NativeState::Local(LocalState::Exited(code)))
                        .with_exit_code(Some(code)),
                    None => NativeStatus::new(NativeState::Local(LocalState::Unknown(
                        line.trim().to_string(),
                    ))),
                },
                "MISSING" => NativeStatus::new(NativeState::Local(LocalState::Vanished))
                    .with_reason(Some(
                        "process exited without recording an exit code".to_string(),
                    )),
                other => NativeStatus::new(NativeState::Local(LocalState::Unknown(
                    other.to_string(),
                ))),
            };
            statuses.insert(pid.to_string(), status);
        }

        statuses
    }

    /// Signals the wrapper's children first so the script itself stops.
    /// A wrapper that already exited is not an error.
    fn cancel_command(&self, ids: &[&JobId]) -> String {
        let pids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        let quoted: Vec<String> = pids.iter().map(|p| shell_quote(p)).collect();
        format!(
            "pkill -TERM -P {} 2>/dev/null; kill -TERM {} 2>/dev/null || true",
            shell_quote(&pids.join(",")),
            quoted.join(" ")
        )
    }

    fn missing_state(&self) -> JobState {
        JobState::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::{Paths, job};
    use batchport_launch::ResourceSpec;

    #[test]
    fn test_submit_command() {
        let resources = ResourceSpec::new();
        let paths = Paths::new("bp-l");
        let cmd = LocalFork.submit_command(&paths.ctx("bp-l", "echo hi", &resources));
        assert!(cmd.starts_with("nohup bash -c 'cd /home/alice/.batchport/scripts && bash "));
        assert!(cmd.contains("bash /home/alice/.batchport/scripts/bp-l.submit > "));
        assert!(cmd.contains("mv /home/alice/.batchport/scripts/bp-l.submit.ec.tmp"));
        assert!(cmd.ends_with("& echo $!"));
    }

    #[test]
    fn test_parse_submit() {
        assert_eq!(LocalFork.parse_submit("4242\n").unwrap(), JobId::from("4242"));
        assert!(LocalFork.parse_submit("bash: nohup: not found").is_err());
    }

    #[test]
    fn test_status_command_lists_entries() {
        let a = job("101");
        let cmd = LocalFork.status_command(&[&a]);
        assert!(cmd.starts_with("for entry in 101:/tmp/scripts/101.submit; do"));
        assert!(cmd.contains("kill -0"));
    }

    #[test]
    fn test_parse_status() {
        let out = "101 RUNNING\n102 EXIT 0\n103 EXIT 1\n104 MISSING\n105 EXIT\n";
        let statuses = LocalFork.parse_status(out);
        assert_eq!(statuses["101"].resolve("101").0, JobState::Running);
        assert_eq!(statuses["102"].resolve("102"), (JobState::Done, None));
        assert_eq!(
            statuses["103"].resolve("103"),
            (JobState::Failed, Some("exit code 1".to_string()))
        );
        let (state, reason) = statuses["104"].resolve("104");
        assert_eq!(state, JobState::Failed);
        assert!(reason.unwrap().contains("without recording"));
        assert!(matches!(
            statuses["105"].state,
            NativeState::Local(LocalState::Unknown(_))
        ));
    }

    #[test]
    fn test_cancel_command() {
        let a = JobId::from("101");
        let b = JobId::from("102");
        assert_eq!(
            LocalFork.cancel_command(&[&a, &b]),
            "pkill -TERM -P 101,102 2>/dev/null; kill -TERM 101 102 2>/dev/null || true"
        );
    }
}
