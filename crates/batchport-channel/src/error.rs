//! Error types for channel operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur while talking to an execution target.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// Transport could not be established or dropped mid-call.
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// Command exceeded the caller-supplied timeout.
    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    /// Authentication to the remote host was rejected.
    #[error("Authentication to {host} failed: {reason}")]
    Authentication { host: String, reason: String },

    /// Server host key could not be verified.
    #[error("Host key for {host} could not be verified")]
    BadHostKey { host: String },

    /// Script directory is missing or inaccessible on the target.
    #[error("Inaccessible script directory on {host}: {}", path.display())]
    BadScriptPath { host: String, path: PathBuf },

    /// The user lacks permissions on a target path.
    #[error("Permission denied on {host}: {}", path.display())]
    PermissionDenied { host: String, path: PathBuf },

    /// A pull would overwrite an existing local file.
    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    /// File transfer failed.
    #[error("File copy failed on {host}: {reason}")]
    FileCopy { host: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Create a connection error.
    pub fn connection(host: impl Into<String>, reason: impl Into<String>) -> Self {
        ChannelError::Connection {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a file copy error.
    pub fn file_copy(host: impl Into<String>, reason: impl Into<String>) -> Self {
        ChannelError::FileCopy {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only transport-level failures qualify; a timed out or rejected
    /// command is reported to the caller as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Connection { .. })
    }
}
