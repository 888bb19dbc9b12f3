//! Wire types for QingCloud IaaS responses.

use serde::Deserialize;

use crate::volume::{Attachment, InstanceId, JobStatus, Volume, VolumeType};

/// Fields present on every response.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub(crate) ret_code: i64,
    #[serde(default)]
    pub(crate) message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeVolumesResponse {
    #[serde(default)]
    pub(crate) volume_set: Vec<VolumeItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VolumeItem {
    pub(crate) volume_id: String,
    #[serde(default)]
    pub(crate) volume_name: String,
    #[serde(default)]
    pub(crate) size: u32,
    #[serde(default)]
    pub(crate) volume_type: Option<i64>,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) instance: Option<InstanceRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstanceRef {
    #[serde(default)]
    pub(crate) instance_id: String,
    #[serde(default)]
    pub(crate) device: String,
}

impl VolumeItem {
    /// Volumes in these states no longer exist for attach purposes.
    pub(crate) fn is_gone(&self) -> bool {
        matches!(self.status.as_str(), "deleted" | "ceased")
    }

    pub(crate) fn into_volume(self) -> Volume {
        let attachment = self
            .instance
            .filter(|instance| !instance.instance_id.trim().is_empty())
            .map(|instance| Attachment {
                instance_id: InstanceId::from(instance.instance_id),
                device: instance.device,
            });
        Volume {
            id: self.volume_id,
            name: self.volume_name,
            capacity_gb: self.size,
            volume_type: self.volume_type.and_then(VolumeType::from_code),
            attachment,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateVolumesResponse {
    pub(crate) job_id: String,
    #[serde(default)]
    pub(crate) volumes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobResponse {
    pub(crate) job_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeJobsResponse {
    #[serde(default)]
    pub(crate) job_set: Vec<JobItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobItem {
    pub(crate) job_id: String,
    pub(crate) status: String,
}

/// Maps a provider job status onto [`JobStatus`]; unknown values are
/// treated as still running.
pub(crate) fn job_status(raw: &str) -> JobStatus {
    match raw {
        "successful" => JobStatus::Successful,
        "failed" | "done with failure" => JobStatus::Failed(raw.to_owned()),
        _ => JobStatus::Pending,
    }
}
