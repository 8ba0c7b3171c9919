//! Cray ALPS `aprun` launcher.

use super::write_command_file;
use crate::error::LaunchResult;
use crate::launcher::{Launcher, check_counts};
use crate::resources::ResourceSpec;

/// Starts all tasks with `aprun`, passing extra flags verbatim.
#[derive(Debug, Clone, Default)]
pub struct AprunLauncher {
    overrides: String,
}

impl AprunLauncher {
    /// Create a launcher appending `overrides` to the `aprun` invocation.
    pub fn new(overrides: impl Into<String>) -> Self {
        Self {
            overrides: overrides.into(),
        }
    }
}

impl Launcher for AprunLauncher {
    fn name(&self) -> &'static str {
        "aprun"
    }

    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String> {
        check_counts(self.name(), spec)?;

        let mut script = String::new();
        script.push_str(&format!("WORKERCOUNT={}\n\n", spec.total_tasks()));
        write_command_file(&mut script, command, "cmd_$JOBNAME.sh", "APRUN_EOF");

        let mut invocation = format!(
            "aprun -n {} -N {}",
            spec.total_tasks(),
            spec.tasks_per_node
        );
        if !self.overrides.trim().is_empty() {
            invocation.push(' ');
            invocation.push_str(self.overrides.trim());
        }
        script.push_str(&format!("{} /bin/bash cmd_$JOBNAME.sh &\n", invocation));
        script.push_str("wait\n\n");
        script.push_str("echo \"Done\"\n");
        Ok(script)
    }
}
