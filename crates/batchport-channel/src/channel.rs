//! The channel trait.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChannelResult;

/// Outcome of a command executed over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code of the command (-1 when killed by a signal).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Create an output with the given fields.
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// A failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::new(exit_code, "", stderr)
    }

    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Transport to an execution target.
///
/// Channels are shared by a single provider, which serializes calls; an
/// implementation does not need to support concurrent commands on one
/// session, but every call must leave the session usable when its future
/// is dropped or times out.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Hostname of the execution target.
    fn hostname(&self) -> &str;

    /// Directory on the target where generated scripts are staged.
    fn script_dir(&self) -> &Path;

    /// Execute a shell command, failing with `Timeout` if it runs longer
    /// than `timeout`.
    async fn execute(&self, command: &str, timeout: Duration) -> ChannelResult<ExecOutput>;

    /// Copy a local file to `remote_path`, creating its parent directory.
    async fn push_file(&self, local_path: &Path, remote_path: &Path) -> ChannelResult<()>;

    /// Copy `remote_path` from the target to `local_path`.
    async fn pull_file(&self, remote_path: &Path, local_path: &Path) -> ChannelResult<()>;

    /// Close the session and drop any credentials.
    async fn close(&self) -> ChannelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_constructors() {
        let out = ExecOutput::ok("Submitted batch job 12\n");
        assert!(out.success());
        assert_eq!(out.stderr, "");

        let out = ExecOutput::failed(1, "sbatch: error: invalid partition");
        assert!(!out.success());
        assert_eq!(out.exit_code, 1);
        assert!(out.stdout.is_empty());
    }
}
