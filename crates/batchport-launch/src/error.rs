//! Error types for resource handling and launchers.

use thiserror::Error;

/// Result type for launch operations.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Errors raised while validating resources or wrapping commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The launcher cannot express the requested resources.
    #[error("Launcher '{launcher}' cannot satisfy resources: {reason}")]
    UnsupportedResource {
        launcher: &'static str,
        reason: String,
    },

    /// Walltime string is not `HH:MM:SS`.
    #[error("Invalid walltime '{0}': expected HH:MM:SS")]
    InvalidWalltime(String),

    /// No launcher with this name.
    #[error("Unknown launcher: {0}")]
    UnknownLauncher(String),
}

impl LaunchError {
    pub(crate) fn unsupported(launcher: &'static str, reason: impl Into<String>) -> Self {
        LaunchError::UnsupportedResource {
            launcher,
            reason: reason.into(),
        }
    }
}
