//! Capability interface over the cloud block-storage API.
//!
//! Every mutating call returns a job handle instead of a result; callers
//! poll the job through [`BlockStorage::describe_job`]. Describe calls are
//! the only trusted source of attachment state.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::volume::{CreatedVolume, InstanceId, JobId, JobStatus, Volume, VolumeRequest};

/// Return code the provider uses for resources that do not exist.
pub const RET_CODE_RESOURCE_NOT_FOUND: i64 = 2100;

const ALREADY_DELETED_MARKER: &str = "already been deleted";
const ALREADY_ATTACHED_MARKER: &str = "already attached to instance";

/// Failure reported by the provider API or the transport in front of it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("provider error: {message}")]
pub struct ProviderError {
    /// Structured return code, when the API supplied one.
    pub code: Option<i64>,
    /// Message returned by the provider.
    pub message: String,
}

/// Classification of a [`ProviderError`] for idempotency decisions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderErrorKind {
    /// The referenced resource does not exist.
    NotFound,
    /// The volume was deleted by an earlier call.
    AlreadyDeleted,
    /// The volume is already bound to the requested instance.
    AlreadyAttached,
    /// Anything else; propagated to the caller.
    Other,
}

impl ProviderError {
    /// Builds an error carrying a provider return code.
    #[must_use]
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Builds an error for transport or decoding failures.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Classifies the error.
    ///
    /// The provider has no dedicated codes for the desired-state races, so
    /// those fall back to message matching; the not-found code is checked
    /// structurally.
    #[must_use]
    pub fn kind(&self) -> ProviderErrorKind {
        let message = self.message.to_ascii_lowercase();
        if message.contains(ALREADY_DELETED_MARKER) {
            ProviderErrorKind::AlreadyDeleted
        } else if message.contains(ALREADY_ATTACHED_MARKER) {
            ProviderErrorKind::AlreadyAttached
        } else if self.code == Some(RET_CODE_RESOURCE_NOT_FOUND) {
            ProviderErrorKind::NotFound
        } else {
            ProviderErrorKind::Other
        }
    }
}

/// Future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Operations the core needs from a block-storage provider.
pub trait BlockStorage: Send + Sync {
    /// Describes the given volumes in one call. Unknown or deleted IDs are
    /// omitted from the result.
    fn describe_volumes<'a>(&'a self, volume_ids: &'a [String]) -> StorageFuture<'a, Vec<Volume>>;

    /// Starts creating a volume.
    fn create_volumes<'a>(&'a self, request: &'a VolumeRequest)
    -> StorageFuture<'a, CreatedVolume>;

    /// Starts deleting volumes.
    fn delete_volumes<'a>(&'a self, volume_ids: &'a [String]) -> StorageFuture<'a, JobId>;

    /// Starts attaching volumes to an instance.
    fn attach_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
        instance_id: &'a InstanceId,
    ) -> StorageFuture<'a, JobId>;

    /// Starts detaching volumes from an instance.
    fn detach_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
        instance_id: &'a InstanceId,
    ) -> StorageFuture<'a, JobId>;

    /// Reads the current status of a job; `None` when the job is unknown.
    fn describe_job<'a>(&'a self, job_id: &'a JobId) -> StorageFuture<'a, Option<JobStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        ProviderError::api(2100, "volume [vol-1] has already been deleted"),
        ProviderErrorKind::AlreadyDeleted
    )]
    #[case(
        ProviderError::api(1400, "volume [vol-1] have been already attached to instance [i-1]"),
        ProviderErrorKind::AlreadyAttached
    )]
    #[case(
        ProviderError::api(2100, "resource [vol-1] not found"),
        ProviderErrorKind::NotFound
    )]
    #[case(
        ProviderError::api(5000, "internal server error"),
        ProviderErrorKind::Other
    )]
    #[case(ProviderError::transport("connection reset"), ProviderErrorKind::Other)]
    fn provider_errors_classify_by_code_then_message(
        #[case] error: ProviderError,
        #[case] expected: ProviderErrorKind,
    ) {
        assert_eq!(error.kind(), expected);
    }
}
