//! Error types for the attach/detach orchestrator.

use std::time::Duration;

use thiserror::Error;

use crate::manager::VolumeError;
use crate::mount::MountError;

/// Errors raised while attaching, detaching, or mounting volumes on a node.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AttachDetachError {
    /// Wrapper for volume manager failures.
    #[error(transparent)]
    Volume(#[from] VolumeError),
    /// Wrapper for local mount failures.
    #[error(transparent)]
    Mount(#[from] MountError),
    /// Raised when the caller supplies unusable input; never retried.
    #[error("precondition violated: {0}")]
    Precondition(String),
    /// Raised when a device path does not reach the awaited state in time.
    #[error("timeout after {timeout:?} waiting for device {device_path} to {action}")]
    Timeout {
        /// State being awaited.
        action: &'static str,
        /// Device path being probed.
        device_path: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Raised when the device path cannot be probed.
    #[error("failed to probe device {device_path}: {message}")]
    DeviceProbe {
        /// Device path being probed.
        device_path: String,
        /// Underlying I/O error text.
        message: String,
    },
}
