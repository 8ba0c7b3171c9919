//! SLURM batch script templates.

use crate::dialect::{ScriptContext, push_body, push_overrides};

/// Generate a SLURM batch script.
pub fn generate_batch_script(ctx: &ScriptContext<'_>, exclusive: bool) -> String {
    let res = ctx.resources;
    let mut script = String::new();

    script.push_str("#!/bin/bash\n");

    script.push_str(&format!("#SBATCH --job-name={}\n", ctx.job_name));
    script.push_str(&format!("#SBATCH --output={}\n", ctx.stdout_path.display()));
    script.push_str(&format!("#SBATCH --error={}\n", ctx.stderr_path.display()));
    script.push_str(&format!("#SBATCH --nodes={}\n", res.nodes));
    script.push_str(&format!("#SBATCH --ntasks-per-node={}\n", res.tasks_per_node));
    script.push_str(&format!("#SBATCH --cpus-per-task={}\n", res.cores_per_task));
    script.push_str(&format!("#SBATCH --time={}\n", res.walltime));

    if let Some(mem) = res.memory_mb {
        script.push_str(&format!("#SBATCH --mem={}M\n", mem));
    }
    if let Some(ref partition) = res.queue {
        script.push_str(&format!("#SBATCH --partition={}\n", partition));
    }
    if let Some(ref account) = res.account {
        script.push_str(&format!("#SBATCH --account={}\n", account));
    }
    if exclusive {
        script.push_str("#SBATCH --exclusive\n");
    }
    push_overrides(&mut script, &res.overrides);

    push_body(&mut script, ctx);
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::test_support::Paths;
    use batchport_launch::{ResourceSpec, Walltime};

    #[test]
    fn test_generate_batch_script() {
        let resources = ResourceSpec::new()
            .with_nodes(2)
            .with_tasks_per_node(4)
            .with_memory_mb(8192)
            .with_walltime(Walltime::from_hms(1, 0, 0))
            .with_queue("standard")
            .with_account("project_462000000")
            .with_overrides("#SBATCH --constraint=gpu");
        let paths = Paths::new("bp-job");
        let script = generate_batch_script(&paths.ctx("bp-job", "srun hostname", &resources), true);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=bp-job\n"));
        assert!(script.contains("#SBATCH --output=/home/alice/.batchport/scripts/bp-job.stdout\n"));
        assert!(script.contains("#SBATCH --nodes=2\n"));
        assert!(script.contains("#SBATCH --ntasks-per-node=4\n"));
        assert!(script.contains("#SBATCH --time=01:00:00\n"));
        assert!(script.contains("#SBATCH --mem=8192M\n"));
        assert!(script.contains("#SBATCH --partition=standard\n"));
        assert!(script.contains("#SBATCH --account=project_462000000\n"));
        assert!(script.contains("#SBATCH --exclusive\n"));
        assert!(script.contains("#SBATCH --constraint=gpu\n"));
        assert!(script.contains("export JOBNAME=bp-job\n"));
        assert!(script.trim_end().ends_with("srun hostname"));

        // Directives must precede the first command.
        let last_directive = script.rfind("#SBATCH").unwrap();
        assert!(last_directive < script.find("export JOBNAME").unwrap());
    }

    #[test]
    fn test_optional_directives_omitted() {
        let resources = ResourceSpec::new();
        let paths = Paths::new("bp-min");
        let script = generate_batch_script(&paths.ctx("bp-min", "true", &resources), false);

        assert!(!script.contains("--mem"));
        assert!(!script.contains("--partition"));
        assert!(!script.contains("--account"));
        assert!(!script.contains("--exclusive"));
    }
}
