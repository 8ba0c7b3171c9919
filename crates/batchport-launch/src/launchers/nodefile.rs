//! Launchers that fan out over the hosts in `$PBS_NODEFILE`.

use super::write_command_file;
use crate::error::LaunchResult;
use crate::launcher::{Launcher, check_counts};
use crate::resources::ResourceSpec;

/// Writes the deduplicated node list to `$<var>`, falling back to localhost.
fn nodefile_prelude(script: &mut String, workers: u32, var: &str) {
    script.push_str("export CORES=$(getconf _NPROCESSORS_ONLN)\n");
    script.push_str("echo \"Found cores : $CORES\"\n");
    script.push_str(&format!("WORKERCOUNT={}\n\n", workers));
    script.push_str("# Deduplicate the nodefile\n");
    script.push_str(&format!("{}=\"$JOBNAME.nodes\"\n", var));
    script.push_str("if [ -z \"$PBS_NODEFILE\" ]; then\n");
    script.push_str(&format!("    echo \"localhost\" > ${}\n", var));
    script.push_str("else\n");
    script.push_str(&format!("    sort -u $PBS_NODEFILE > ${}\n", var));
    script.push_str("fi\n\n");
}

/// Runs the command through GNU parallel over ssh logins to each node.
#[derive(Debug, Clone, Copy, Default)]
pub struct GnuParallelLauncher;

impl Launcher for GnuParallelLauncher {
    fn name(&self) -> &'static str {
        "gnu-parallel"
    }

    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String> {
        check_counts(self.name(), spec)?;

        let mut script = String::new();
        nodefile_prelude(&mut script, spec.total_tasks(), "SSHLOGINFILE");
        write_command_file(&mut script, command, "cmd_$JOBNAME.sh", "PARALLEL_CMD_EOF");

        script.push_str("PFILE=cmd_${JOBNAME}.sh.parallel\n");
        script.push_str("cp /dev/null $PFILE\n");
        script.push_str("for COUNT in $(seq 1 1 $WORKERCOUNT)\n");
        script.push_str("do\n");
        script.push_str("    echo \"sh cmd_$JOBNAME.sh\" >> $PFILE\n");
        script.push_str("done\n\n");
        script.push_str(&format!(
            "parallel --env _ --joblog \"$JOBNAME.sh.parallel.log\" \\\n    --sshloginfile $SSHLOGINFILE --jobs {} < $PFILE\n\n",
            spec.tasks_per_node
        ));
        script.push_str("echo \"All workers done\"\n");
        Ok(script)
    }
}

/// Runs `nodes * tasks_per_node` copies of the command with `mpiexec`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MpiExecLauncher;

impl Launcher for MpiExecLauncher {
    fn name(&self) -> &'static str {
        "mpiexec"
    }

    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String> {
        check_counts(self.name(), spec)?;

        let mut script = String::new();
        nodefile_prelude(&mut script, spec.total_tasks(), "HOSTFILE");
        write_command_file(&mut script, command, "cmd_$JOBNAME.sh", "MPIEXEC_EOF");

        script.push_str(
            "mpiexec --bind-to none -n $WORKERCOUNT --hostfile $HOSTFILE /bin/sh cmd_$JOBNAME.sh\n\n",
        );
        script.push_str("echo \"All workers done\"\n");
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gnu_parallel_script() {
        let spec = ResourceSpec::new().with_nodes(3).with_tasks_per_node(2);
        let out = GnuParallelLauncher.wrap("./simulate", &spec).unwrap();

        assert!(out.contains("WORKERCOUNT=6\n"));
        assert!(out.contains("sort -u $PBS_NODEFILE > $SSHLOGINFILE"));
        assert!(out.contains("cat << 'PARALLEL_CMD_EOF' > cmd_$JOBNAME.sh\n./simulate\n"));
        assert!(out.contains("--sshloginfile $SSHLOGINFILE --jobs 2 < $PFILE"));
    }

    #[test]
    fn test_mpiexec_script() {
        let spec = ResourceSpec::new().with_nodes(2).with_tasks_per_node(16);
        let out = MpiExecLauncher.wrap("./solver --in data", &spec).unwrap();

        assert!(out.contains("WORKERCOUNT=32\n"));
        assert!(out.contains("HOSTFILE=\"$JOBNAME.nodes\""));
        assert!(out.contains("mpiexec --bind-to none -n $WORKERCOUNT --hostfile $HOSTFILE"));
        assert!(out.contains("./solver --in data\nMPIEXEC_EOF\n"));
    }
}
