//! Error types for the volume manager and job waiter.

use std::time::Duration;

use thiserror::Error;

use crate::storage::ProviderError;
use crate::volume::{InvalidVolumeType, JobId};

/// Errors raised while driving cloud volume operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// Wrapper for provider API or transport failures.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when a volume is absent from a describe that should list it.
    #[error("volume '{volume_id}' missing after {action}")]
    VolumeNotFound {
        /// Volume identifier that could not be found.
        volume_id: String,
        /// Operation that expected the volume to exist.
        action: &'static str,
    },
    /// Raised when the provider reports an attachment without a device path.
    #[error("the device of volume '{volume_id}' is empty")]
    EmptyDevicePath {
        /// Volume identifier with the blank device.
        volume_id: String,
    },
    /// Raised when a provider job finishes unsuccessfully.
    #[error("job {job_id} failed: {reason}")]
    JobFailed {
        /// Job identifier.
        job_id: JobId,
        /// Status reported by the provider.
        reason: String,
    },
    /// Raised when the provider no longer knows a job.
    #[error("job {job_id} not found")]
    JobNotFound {
        /// Job identifier.
        job_id: JobId,
    },
    /// Raised when a job does not finish before the deadline.
    #[error("timeout after {timeout:?} waiting for job {job_id}")]
    Timeout {
        /// Job identifier.
        job_id: JobId,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Raised when a requested volume type is outside the allowed set.
    #[error(transparent)]
    InvalidVolumeType(#[from] InvalidVolumeType),
}

impl VolumeError {
    /// Returns `true` when the error is a deadline rather than a provider
    /// failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
