//! PBS batch script templates.

use crate::dialect::{ScriptContext, push_body, push_overrides};

/// Generate a PBS batch script.
pub fn generate_batch_script(ctx: &ScriptContext<'_>) -> String {
    let res = ctx.resources;
    let mut script = String::new();

    script.push_str("#!/bin/bash\n");
    script.push_str("#PBS -S /bin/bash\n");
    script.push_str(&format!("#PBS -N {}\n", ctx.job_name));
    script.push_str("#PBS -m n\n");
    script.push_str(&format!("#PBS -l walltime={}\n", res.walltime));
    script.push_str(&format!(
        "#PBS -l nodes={}:ppn={}\n",
        res.nodes,
        res.tasks_per_node.saturating_mul(res.cores_per_task)
    ));
    if let Some(mem) = res.memory_mb {
        script.push_str(&format!("#PBS -l mem={}mb\n", mem));
    }
    script.push_str(&format!("#PBS -o {}\n", ctx.stdout_path.display()));
    script.push_str(&format!("#PBS -e {}\n", ctx.stderr_path.display()));
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
            .with_nodes(3)
            .with_tasks_per_node(4)
            .with_cores_per_task(2)
            .with_walltime(Walltime::from_hms(2, 30, 0))
            .with_overrides("#PBS -l feature=knl");
        let paths = Paths::new("bp-pbs");
        let script = generate_batch_script(&paths.ctx("bp-pbs", "mpirun ./a.out", &resources));

        assert!(script.contains("#PBS -N bp-pbs\n"));
        assert!(script.contains("#PBS -l walltime=02:30:00\n"));
        assert!(script.contains("#PBS -l nodes=3:ppn=8\n"));
        assert!(script.contains("#PBS -o /home/alice/.batchport/scripts/bp-pbs.stdout\n"));
        assert!(script.contains("#PBS -l feature=knl\n"));
        assert!(!script.contains("mem="));
        assert!(script.trim_end().ends_with("mpirun ./a.out"));
    }
}
