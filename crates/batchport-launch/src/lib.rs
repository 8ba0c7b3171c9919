//! Batchport Launchers
//!
//! Resource specifications and the launchers that adapt a user command to a
//! backend's invocation convention. Launching is pure string rewriting: a
//! launcher never touches a channel, so a resource request it cannot
//! express is rejected before anything reaches the backend.
//!
//! ```text
//!   "python work.py" + ResourceSpec { nodes: 2, tasks_per_node: 4, .. }
//!        │
//!        ▼  SrunLauncher::wrap
//!   cat << 'SLURM_EOF' > cmd_$SLURM_JOB_NAME.sh
//!   python work.py
//!   SLURM_EOF
//!   srun --ntasks 8 -l bash cmd_$SLURM_JOB_NAME.sh
//! ```

pub mod error;
pub mod launcher;
pub mod launchers;
pub mod resources;

pub use error::{LaunchError, LaunchResult};
pub use launcher::{Launcher, LauncherKind};
pub use launchers::{
    AprunLauncher, GnuParallelLauncher, MpiExecLauncher, SimpleLauncher, SingleNodeLauncher,
    SrunLauncher, SrunMpiLauncher,
};
pub use resources::{ResourceSpec, Walltime};
