//! The launcher trait and launcher selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, LaunchResult};
use crate::launchers::{
    AprunLauncher, GnuParallelLauncher, MpiExecLauncher, SimpleLauncher, SingleNodeLauncher,
    SrunLauncher, SrunMpiLauncher,
};
use crate::resources::ResourceSpec;

/// Wraps a user command for a backend's invocation convention.
///
/// `wrap` is pure: it renders a shell fragment from its inputs and never
/// performs I/O. It accepts any command string.
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Short kebab-case name.
    fn name(&self) -> &'static str;

    /// Wrap `command` for the resources in `spec`.
    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String>;
}

/// Launcher selection by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LauncherKind {
    #[default]
    Simple,
    SingleNode,
    GnuParallel,
    Mpiexec,
    Srun,
    SrunMpi,
    Aprun,
}

impl LauncherKind {
    /// All launcher kinds.
    pub const ALL: [LauncherKind; 7] = [
        LauncherKind::Simple,
        LauncherKind::SingleNode,
        LauncherKind::GnuParallel,
        LauncherKind::Mpiexec,
        LauncherKind::Srun,
        LauncherKind::SrunMpi,
        LauncherKind::Aprun,
    ];

    /// Kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LauncherKind::Simple => "simple",
            LauncherKind::SingleNode => "single-node",
            LauncherKind::GnuParallel => "gnu-parallel",
            LauncherKind::Mpiexec => "mpiexec",
            LauncherKind::Srun => "srun",
            LauncherKind::SrunMpi => "srun-mpi",
            LauncherKind::Aprun => "aprun",
        }
    }

    /// Build the launcher. `aprun_overrides` is only used by `aprun`.
    pub fn build(self, aprun_overrides: &str) -> Box<dyn Launcher> {
        match self {
            LauncherKind::Simple => Box::new(SimpleLauncher),
            LauncherKind::SingleNode => Box::new(SingleNodeLauncher),
            LauncherKind::GnuParallel => Box::new(GnuParallelLauncher),
            LauncherKind::Mpiexec => Box::new(MpiExecLauncher),
            LauncherKind::Srun => Box::new(SrunLauncher),
            LauncherKind::SrunMpi => Box::new(SrunMpiLauncher),
            LauncherKind::Aprun => Box::new(AprunLauncher::new(aprun_overrides)),
        }
    }
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LauncherKind {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        LauncherKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| LaunchError::UnknownLauncher(s.to_string()))
    }
}

/// Reject zero node or task counts, which no launcher can express.
pub(crate) fn check_counts(launcher: &'static str, spec: &ResourceSpec) -> LaunchResult<()> {
    if spec.nodes == 0 {
        return Err(LaunchError::unsupported(launcher, "at least one node is required"));
    }
    if spec.tasks_per_node == 0 {
        return Err(LaunchError::unsupported(
            launcher,
            "at least one task per node is required",
        ));
    }
    Ok(())
}
