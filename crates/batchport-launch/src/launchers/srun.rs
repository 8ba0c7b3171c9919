//! SLURM `srun` launchers.

use super::write_command_file;
use crate::error::LaunchResult;
use crate::launcher::{Launcher, check_counts};
use crate::resources::ResourceSpec;

fn srun_prelude(script: &mut String, command: &str, task_blocks: u32) {
    script.push_str("export CORES=$SLURM_CPUS_ON_NODE\n");
    script.push_str("export NODES=$SLURM_JOB_NUM_NODES\n\n");
    script.push_str("echo \"Found cores : $CORES\"\n");
    script.push_str("echo \"Found nodes : $NODES\"\n");
    script.push_str(&format!("WORKERCOUNT={}\n\n", task_blocks));
    write_command_file(script, command, "cmd_$SLURM_JOB_NAME.sh", "SLURM_EOF");
    script.push_str(&format!("TASKBLOCKS={}\n\n", task_blocks));
}

/// Starts all tasks in the allocation with a single `srun`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SrunLauncher;

impl Launcher for SrunLauncher {
    fn name(&self) -> &'static str {
        "srun"
    }

    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String> {
        check_counts(self.name(), spec)?;

        let mut script = String::new();
        srun_prelude(&mut script, command, spec.total_tasks());
        script.push_str("srun --ntasks $TASKBLOCKS -l bash cmd_$SLURM_JOB_NAME.sh\n\n");
        script.push_str("echo \"Done\"\n");
        Ok(script)
    }
}

/// Starts one `srun` step per task block, splitting cores when blocks
/// outnumber nodes and whole nodes otherwise. Suited to MPI applications
/// that need an exclusive slice of the allocation per block.
#[derive(Debug, Clone, Copy, Default)]
pub struct SrunMpiLauncher;

impl Launcher for SrunMpiLauncher {
    fn name(&self) -> &'static str {
        "srun-mpi"
    }

    fn wrap(&self, command: &str, spec: &ResourceSpec) -> LaunchResult<String> {
        check_counts(self.name(), spec)?;

        let mut script = String::new();
        srun_prelude(&mut script, command, spec.total_tasks());
        script.push_str("if (( \"$TASKBLOCKS\" > \"$NODES\" ))\n");
        script.push_str("then\n");
        script.push_str("    echo \"TaskBlocks:$TASKBLOCKS > Nodes:$NODES\"\n");
        script.push_str("    CORES_PER_BLOCK=$(($NODES * $CORES / $TASKBLOCKS))\n");
        script.push_str("    for blk in $(seq 1 1 $TASKBLOCKS)\n");
        script.push_str("    do\n");
        script.push_str(
            "        srun --ntasks $CORES_PER_BLOCK -l bash cmd_$SLURM_JOB_NAME.sh &\n",
        );
        script.push_str("    done\n");
        script.push_str("    wait\n");
        script.push_str("else\n");
        script.push_str("    echo \"TaskBlocks:$TASKBLOCKS <= Nodes:$NODES\"\n");
        script.push_str("    NODES_PER_BLOCK=$(( $NODES / $TASKBLOCKS ))\n");
        script.push_str("    for blk in $(seq 1 1 $TASKBLOCKS)\n");
        script.push_str("    do\n");
        script.push_str(
            "        srun --exclusive --nodes $NODES_PER_BLOCK -l bash cmd_$SLURM_JOB_NAME.sh &\n",
        );
        script.push_str("    done\n");
        script.push_str("    wait\n");
        script.push_str("fi\n\n");
        script.push_str("echo \"Done\"\n");
        Ok(script)
    }
}
