//! Error types for sidecar supervision.

use thiserror::Error;

use crate::error::ConfigError;

/// Result type for sidecar operations.
pub type Result<T> = std::result::Result<T, SidecarError>;

/// Errors that can occur while supervising a sidecar.
///
/// Only failures with no recovery path surface here. Inventory hiccups and
/// failed kills are logged by the supervisor and never reach the caller.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// The supplied options could not be normalized.
    #[error("Sidecar configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `refresh` was called before any start completed.
    #[error("Sidecar has not been started; call start before refresh")]
    NotStarted,

    /// The sidecar executable could not be launched.
    #[error("Failed to launch sidecar '{executable}': {reason}")]
    LaunchFailed {
        /// Executable that was launched.
        executable: String,
        /// Reason for failure.
        reason: String,
    },

    /// The supervisor was disposed.
    #[error("Sidecar supervisor has been disposed")]
    Disposed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
