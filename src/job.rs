//! Bounded polling of asynchronous provider jobs.

use std::time::Duration;

use tracing::debug;

use crate::manager::VolumeError;
use crate::poll::{FirstPoll, PollError, Probe, poll_until};
use crate::storage::BlockStorage;
use crate::volume::{JobId, JobStatus};

/// Polls a job at a fixed interval until it succeeds, fails, or the
/// configured timeout elapses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JobWaiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl JobWaiter {
    /// Creates a waiter with the given deadline and fixed poll interval.
    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Deadline applied to each wait.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for `job_id` to reach a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::JobFailed`] when the job fails,
    /// [`VolumeError::JobNotFound`] when the provider forgets it,
    /// [`VolumeError::Timeout`] when the deadline elapses first, and
    /// [`VolumeError::Provider`] when a status query fails.
    pub async fn wait<S>(&self, storage: &S, job_id: &JobId) -> Result<(), VolumeError>
    where
        S: BlockStorage + ?Sized,
    {
        let outcome = poll_until(
            self.timeout,
            self.poll_interval,
            FirstPoll::Immediate,
            move || probe_job(storage, job_id),
        )
        .await;

        outcome.map_err(|err| match err {
            PollError::Elapsed => VolumeError::Timeout {
                job_id: job_id.clone(),
                timeout: self.timeout,
            },
            PollError::Probe(inner) => inner,
        })
    }
}

async fn probe_job<S>(storage: &S, job_id: &JobId) -> Result<Probe<()>, VolumeError>
where
    S: BlockStorage + ?Sized,
{
    match storage.describe_job(job_id).await? {
        None => Err(VolumeError::JobNotFound {
            job_id: job_id.clone(),
        }),
        Some(JobStatus::Successful) => Ok(Probe::Ready(())),
        Some(JobStatus::Failed(reason)) => Err(VolumeError::JobFailed {
            job_id: job_id.clone(),
            reason,
        }),
        Some(JobStatus::Pending) => {
            debug!(job_id = %job_id, "job still pending");
            Ok(Probe::Pending)
        }
    }
}
