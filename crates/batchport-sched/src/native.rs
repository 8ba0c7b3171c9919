//! Backend-native job states and their normalization.

use std::fmt;

use tracing::warn;

use crate::dialect::cobalt::CobaltState;
use crate::dialect::condor::CondorState;
use crate::dialect::grid_engine::GridEngineState;
use crate::dialect::local::LocalState;
use crate::dialect::pbs::PbsState;
use crate::dialect::slurm::SlurmState;
use crate::job::JobState;

/// A job state in one backend's own vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeState {
    Slurm(SlurmState),
    Pbs(PbsState),
    Cobalt(CobaltState),
    GridEngine(GridEngineState),
    Condor(CondorState),
    Local(LocalState),
}

impl NativeState {
    /// Map to the normalized lifecycle. `None` for states the backend
    /// reported but this crate does not recognize.
    pub fn normalize(&self) -> Option<JobState> {
        match self {
            NativeState::Slurm(s) => s.normalize(),
            NativeState::Pbs(s) => s.normalize(),
            NativeState::Cobalt(s) => s.normalize(),
            NativeState::GridEngine(s) => s.normalize(),
            NativeState::Condor(s) => s.normalize(),
            NativeState::Local(s) => s.normalize(),
        }
    }
}

impl fmt::Display for NativeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeState::Slurm(s) => write!(f, "slurm:{s}"),
            NativeState::Pbs(s) => write!(f, "pbs:{s}"),
            NativeState::Cobalt(s) => write!(f, "cobalt:{s}"),
            NativeState::GridEngine(s) => write!(f, "sge:{s}"),
            NativeState::Condor(s) => write!(f, "condor:{s}"),
            NativeState::Local(s) => write!(f, "local:{s}"),
        }
    }
}

/// One job's entry in a backend status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeStatus {
    pub state: NativeState,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

impl NativeStatus {
    pub fn new(state: NativeState) -> Self {
        Self {
            state,
            exit_code: None,
            reason: None,
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|r| !r.is_empty());
        self
    }

    /// Normalized state plus the failure reason to record, if any.
    ///
    /// A completed job with a non-zero exit code is a failure. An
    /// unrecognized native state is treated as a failure and logged.
    pub fn resolve(&self, job_id: &str) -> (JobState, Option<String>) {
        match self.state.normalize() {
            Some(JobState::Done) => match self.exit_code {
                Some(code) if code != 0 => (JobState::Failed, Some(format!("exit code {code}"))),
                _ => (JobState::Done, None),
            },
            Some(JobState::Failed) => {
                let reason = self
                    .reason
                    .clone()
                    .or_else(|| self.exit_code.map(|c| format!("exit code {c}")))
                    .unwrap_or_else(|| format!("backend reported {}", self.state));
                (JobState::Failed, Some(reason))
            }
            Some(state) => (state, None),
            None => {
                warn!(job_id, native = %self.state, "Unrecognized backend state, marking job failed");
                (
                    JobState::Failed,
                    Some(format!("unrecognized backend state {}", self.state)),
                )
            }
        }
    }
}
