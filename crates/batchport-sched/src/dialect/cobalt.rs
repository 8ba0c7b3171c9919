//! Cobalt dialect (ALCF): `qsub -n -t`, `qstat -u $USER`, `qdel`.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::dialect::{BatchSystem, ScriptContext, join_ids, push_body, quote_path, shell_quote};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobState};
use crate::native::{NativeState, NativeStatus};

/// Cobalt job state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CobaltState {
    Queued,
    Starting,
    Running,
    Exiting,
    Killing,
    Hold,
    Unknown(String),
}

impl CobaltState {
    /// Parse the `State` column of `qstat`.
    pub fn parse(s: &str) -> Self {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "QUEUED" => CobaltState::Queued,
            "STARTING" => CobaltState::Starting,
            "RUNNING" => CobaltState::Running,
            "EXITING" => CobaltState::Exiting,
            "KILLING" => CobaltState::Killing,
            s if s.ends_with("_HOLD") || s == "HOLD" => CobaltState::Hold,
            _ => CobaltState::Unknown(upper),
        }
    }

    /// Map to the normalized lifecycle.
    pub fn normalize(&self) -> Option<JobState> {
        match self {
            CobaltState::Queued | CobaltState::Starting | CobaltState::Hold => {
                Some(JobState::Pending)
            }
            CobaltState::Running => Some(JobState::Running),
            CobaltState::Exiting | CobaltState::Killing => Some(JobState::Done),
            CobaltState::Unknown(_) => None,
        }
    }
}

impl fmt::Display for CobaltState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CobaltState::Queued => f.write_str("queued"),
            CobaltState::Starting => f.write_str("starting"),
            CobaltState::Running => f.write_str("running"),
            CobaltState::Exiting => f.write_str("exiting"),
            CobaltState::Killing => f.write_str("killing"),
            CobaltState::Hold => f.write_str("hold"),
            CobaltState::Unknown(s) => f.write_str(s),
        }
    }
}

/// Cobalt settings.
#[derive(Debug, Clone, Default)]
pub struct Cobalt;

impl BatchSystem for Cobalt {
    fn name(&self) -> &'static str {
        "cobalt"
    }

    fn render_script(&self, ctx: &ScriptContext<'_>) -> String {
        let mut script = String::from("#!/bin/bash -e\n");
        push_body(&mut script, ctx);
        script
    }

    /// Cobalt takes resources as `qsub` flags; the walltime is in minutes.
    fn submit_command(&self, ctx: &ScriptContext<'_>) -> String {
        let res = ctx.resources;
        let mut cmd = format!(
            "qsub -n {} -t {}",
            res.nodes,
            res.walltime.as_minutes_ceil()
        );
        if let Some(ref queue) = res.queue {
            cmd.push_str(&format!(" -q {}", shell_quote(queue)));
        }
        if let Some(ref account) = res.account {
            cmd.push_str(&format!(" -A {}", shell_quote(account)));
        }
        let prefix = ctx.script_dir.join(ctx.job_name);
        cmd.push_str(&format!(" -O {}", quote_path(&prefix)));
        let overrides = res.overrides.trim();
        if !overrides.is_empty() {
            cmd.push(' ');
            cmd.push_str(overrides);
        }
        cmd.push(' ');
        cmd.push_str(&quote_path(ctx.script_path));
        cmd
    }

    fn parse_submit(&self, stdout: &str) -> SchedResult<JobId> {
        let id = stdout.lines().map(str::trim).rfind(|l| !l.is_empty()).unwrap_or("");
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
            return Ok(JobId::from(id));
        }
        Err(SchedError::Submission(format!(
            "unexpected qsub output: {}",
            stdout.trim()
        )))
    }

    fn status_command(&self, _jobs: &[&Job]) -> String {
        "qstat -u $USER".to_string()
    }

    /// ```text
    /// JobID  User   WallTime  Nodes  State    Location
    /// ======================================================
    /// 12345  alice  00:30:00  2      running  ANL-R00-M0-512
    /// ```
    fn parse_status(&self, stdout: &str) -> FxHashMap<String, NativeStatus> {
        let mut statuses = FxHashMap::default();
        let mut state_col = 4;

        for line in stdout.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let Some(first) = parts.first() else {
                continue;
            };
            if first.eq_ignore_ascii_case("JOBID") {
                if let Some(idx) = parts.iter().position(|p| p.eq_ignore_ascii_case("State")) {
                    state_col = idx;
                }
                continue;
            }
            if first.starts_with('=') || first.starts_with('-') {
                continue;
            }
            if let Some(state) = parts.get(state_col) {
                statuses.insert(
                    first.to_string(),
                    NativeStatus::new(NativeState::Cobalt(CobaltState::parse(state))),
                );
            }
        }

        statuses
    }

    fn cancel_command(&self, ids: &[&JobId]) -> String {
        format!("qdel {}", join_ids(ids.iter().copied(), " "))
    }
}
