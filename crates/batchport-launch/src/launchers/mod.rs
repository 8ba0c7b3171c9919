//! Launcher implementations.
//!
//! Multi-task launchers write the user command to `cmd_<jobname>.sh` with a
//! quoted heredoc, so the command text is copied verbatim and expanded only
//! when a task runs it.

mod aprun;
mod nodefile;
mod simple;
mod srun;

pub use aprun::AprunLauncher;
pub use nodefile::{GnuParallelLauncher, MpiExecLauncher};
pub use simple::{SimpleLauncher, SingleNodeLauncher};
pub use srun::{SrunLauncher, SrunMpiLauncher};

/// Append a heredoc writing `command` to `file` and making it executable.
fn write_command_file(script: &mut String, command: &str, file: &str, base_delimiter: &str) {
    let delimiter = unique_delimiter(command, base_delimiter);
    script.push_str(&format!("cat << '{}' > {}\n", delimiter, file));
    script.push_str(command);
    if !command.ends_with('\n') {
        script.push('\n');
    }
    script.push_str(&delimiter);
    script.push('\n');
    script.push_str(&format!("chmod a+x {}\n\n", file));
}

/// A heredoc delimiter that does not appear as a line of `command`.
fn unique_delimiter(command: &str, base: &str) -> String {
    let mut delimiter = base.to_string();
    let mut n = 0;
    while command.lines().any(|line| line == delimiter) {
        n += 1;
        delimiter = format!("{}_{}", base, n);
    }
    delimiter
}
