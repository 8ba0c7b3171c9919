//! Single-node launchers.

use crate::error::{LaunchError, LaunchResult};
use crate::launcher::{Launcher, check_counts};
use crate::resources::ResourceSpec;

/// Returns the command unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleLauncher;

impl Launcher for SimpleLauncher {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String> {
        check_counts(self.name(), spec)?;
        if spec.nodes > 1 {
            return Err(LaunchError::unsupported(
                self.name(),
                format!("{} nodes requested, runs on one", spec.nodes),
            ));
        }
        if spec.tasks_per_node > 1 {
            return Err(LaunchError::unsupported(
                self.name(),
                format!("{} tasks per node requested, runs one", spec.tasks_per_node),
            ));
        }
        Ok(command.to_string())
    }
}

/// Starts `tasks_per_node` copies of the command in the background on one
/// node and waits for all of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNodeLauncher;

impl Launcher for SingleNodeLauncher {
    fn name(&self) -> &'static str {
        "single-node"
    }

    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String> {
        check_counts(self.name(), spec)?;
        if spec.nodes > 1 {
            return Err(LaunchError::unsupported(
                self.name(),
                format!("{} nodes requested, runs on one", spec.nodes),
            ));
        }

        let mut script = String::new();
        script.push_str("export CORES=$(getconf _NPROCESSORS_ONLN)\n");
        script.push_str("echo \"Found cores : $CORES\"\n");
        script.push_str(&format!("WORKERCOUNT={}\n\n", spec.total_tasks()));
        script.push_str("CMD ( ) {\n");
        script.push_str(command);
        if !command.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("}\n");
        script.push_str("for COUNT in $(seq 1 1 $WORKERCOUNT)\n");
        script.push_str("do\n");
        script.push_str("    echo \"Launching worker: $COUNT\"\n");
        script.push_str("    CMD &\n");
        script.push_str("done\n");
        script.push_str("wait\n");
        script.push_str("echo \"All workers done\"\n");
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_is_identity() {
        let out = SimpleLauncher
            .wrap("echo hello", &ResourceSpec::new())
            .unwrap();
        assert_eq!(out, "echo hello");
    }

    #[test]
    fn test_simple_rejects_multi_node_and_multi_task() {
        let err = SimpleLauncher
            .wrap("x", &ResourceSpec::new().with_nodes(2))
            .unwrap_err();
        assert!(err.to_string().contains("2 nodes"));

        assert!(
            SimpleLauncher
                .wrap("x", &ResourceSpec::new().with_tasks_per_node(4))
                .is_err()
        );
    }

    #[test]
    fn test_single_node_worker_count() {
        let spec = ResourceSpec::new().with_tasks_per_node(4);
        let out = SingleNodeLauncher.wrap("python work.py", &spec).unwrap();
        assert!(out.contains("WORKERCOUNT=4\n"));
        assert!(out.contains("CMD ( ) {\npython work.py\n}\n"));
        assert!(out.contains("    CMD &\n"));
        assert!(out.trim_end().ends_with("echo \"All workers done\""));
    }

    #[test]
    fn test_single_node_rejects_multi_node() {
        let spec = ResourceSpec::new().with_nodes(2).with_tasks_per_node(4);
        assert!(matches!(
            SingleNodeLauncher.wrap("x", &spec),
            Err(LaunchError::UnsupportedResource {
                launcher: "single-node",
                ..
            })
        ));
    }
}
