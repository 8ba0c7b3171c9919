//! Channel that runs commands on the local host.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use crate::channel::{Channel, ExecOutput};
use crate::error::{ChannelError, ChannelResult};

const LOCALHOST: &str = "localhost";

/// Runs commands as `sh -c` child processes of the current process.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    script_dir: PathBuf,
    userhome: PathBuf,
    envs: FxHashMap<String, String>,
}

impl LocalChannel {
    /// Create a local channel staging scripts under `script_dir`.
    ///
    /// The directory is created if missing. Commands run with the current
    /// directory as their working directory unless [`with_userhome`] is set.
    ///
    /// [`with_userhome`]: LocalChannel::with_userhome
    pub async fn new(script_dir: impl Into<PathBuf>) -> ChannelResult<Self> {
        let script_dir = script_dir.into();
        fs::create_dir_all(&script_dir)
            .await
            .map_err(|e| map_path_error(e, &script_dir, true))?;

        let userhome = std::env::current_dir()?;
        Ok(Self {
            script_dir,
            userhome,
            envs: FxHashMap::default(),
        })
    }

    /// Set the working directory for executed commands.
    pub fn with_userhome(mut self, userhome: impl Into<PathBuf>) -> Self {
        self.userhome = userhome.into();
        self
    }

    /// Add an environment variable set for every executed command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn hostname(&self) -> &str {
        LOCALHOST
    }

    fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    async fn execute(&self, command: &str, timeout: Duration) -> ChannelResult<ExecOutput> {
        debug!(command, "Executing local command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.userhome)
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ChannelError::Timeout {
                command: command.to_string(),
                timeout,
            })??;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn push_file(&self, local_path: &Path, remote_path: &Path) -> ChannelResult<()> {
        if local_path == remote_path {
            return Ok(());
        }

        if let Some(parent) = remote_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_path_error(e, parent, true))?;
        }

        fs::copy(local_path, remote_path)
            .await
            .map_err(|e| map_path_error(e, remote_path, false))?;
        set_executable(remote_path).await?;

        debug!(
            from = %local_path.display(),
            to = %remote_path.display(),
            "Staged file"
        );
        Ok(())
    }

    async fn pull_file(&self, remote_path: &Path, local_path: &Path) -> ChannelResult<()> {
        if fs::try_exists(local_path).await? {
            return Err(ChannelError::FileExists(local_path.to_path_buf()));
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(remote_path, local_path)
            .await
            .map_err(|e| ChannelError::file_copy(LOCALHOST, e.to_string()))?;
        Ok(())
    }
}

fn map_path_error(err: std::io::Error, path: &Path, is_dir: bool) -> ChannelError {
    match err.kind() {
        ErrorKind::PermissionDenied => ChannelError::PermissionDenied {
            host: LOCALHOST.to_string(),
            path: path.to_path_buf(),
        },
        ErrorKind::NotFound if is_dir => ChannelError::BadScriptPath {
            host: LOCALHOST.to_string(),
            path: path.to_path_buf(),
        },
        _ if is_dir => ChannelError::Io(err),
        _ => ChannelError::file_copy(LOCALHOST, err.to_string()),
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> ChannelResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> ChannelResult<()> {
    Ok(())
}
