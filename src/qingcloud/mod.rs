//! QingCloud IaaS implementation of [`BlockStorage`].

mod signer;
mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{ConfigError, FlexVolumeConfig};
use crate::storage::{BlockStorage, ProviderError, StorageFuture};
use crate::volume::{CreatedVolume, InstanceId, JobId, JobStatus, Volume, VolumeRequest};
use types::{
    CreateVolumesResponse, DescribeJobsResponse, DescribeVolumesResponse, Envelope, JobResponse,
    job_status,
};

const API_VERSION: &str = "1";
const SIGNATURE_METHOD: &str = "HmacSHA256";
const SIGNATURE_VERSION: &str = "1";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DESCRIBE_LIMIT: usize = 100;

/// Block storage backed by the QingCloud IaaS HTTP API.
#[derive(Clone, Debug)]
pub struct QingCloudStorage {
    client: reqwest::Client,
    endpoint: String,
    request_path: String,
    zone: String,
    access_key_id: String,
    secret_access_key: String,
}

impl QingCloudStorage {
    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &FlexVolumeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ConfigError::Invalid(format!("HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            request_path: config.request_path(),
            zone: config.zone.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
        })
    }

    fn signed_query(
        &self,
        action: &str,
        params: Vec<(String, String)>,
        now: DateTime<Utc>,
    ) -> Result<String, ProviderError> {
        let mut all: BTreeMap<String, String> = params.into_iter().collect();
        all.insert(String::from("action"), action.to_owned());
        all.insert(String::from("zone"), self.zone.clone());
        all.insert(String::from("access_key_id"), self.access_key_id.clone());
        all.insert(
            String::from("time_stamp"),
            now.format(TIMESTAMP_FORMAT).to_string(),
        );
        all.insert(String::from("version"), API_VERSION.to_owned());
        all.insert(
            String::from("signature_method"),
            SIGNATURE_METHOD.to_owned(),
        );
        all.insert(
            String::from("signature_version"),
            SIGNATURE_VERSION.to_owned(),
        );

        let query = signer::canonical_query(&all);
        let signature = signer::sign(&self.secret_access_key, &self.request_path, &query)?;
        Ok(format!("{query}&signature={}", signer::escape(&signature)))
    }

    async fn call<T>(&self, action: &str, params: Vec<(String, String)>) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let query = self.signed_query(action, params, Utc::now())?;
        let url = format!("{}?{query}", self.endpoint);
        debug!(action, "calling provider API");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ProviderError::transport(format!("{action}: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::transport(format!("{action}: {err}")))?;
        if !status.is_success() {
            return Err(ProviderError::transport(format!(
                "{action}: HTTP {status}: {}",
                body.trim()
            )));
        }
        decode(action, &body)
    }
}

/// Decodes a response body, mapping a non-zero `ret_code` to an error.
fn decode<T>(action: &str, body: &str) -> Result<T, ProviderError>
where
    T: DeserializeOwned,
{
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|err| ProviderError::transport(format!("{action}: malformed response: {err}")))?;
    if envelope.ret_code != 0 {
        return Err(ProviderError::api(envelope.ret_code, envelope.message));
    }
    serde_json::from_str(body)
        .map_err(|err| ProviderError::transport(format!("{action}: malformed response: {err}")))
}

fn indexed(prefix: &str, values: &[String]) -> Vec<(String, String)> {
    values
        .iter()
        .zip(1..)
        .map(|(value, index): (&String, usize)| (format!("{prefix}.{index}"), value.clone()))
        .collect()
}

fn single(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_owned(), value.into())
}

/// Splits a describe into requests of at most [`MAX_DESCRIBE_LIMIT`] IDs,
/// each with its own `limit` so no requested volume is paged out.
fn describe_batches(volume_ids: &[String]) -> Vec<Vec<(String, String)>> {
    volume_ids
        .chunks(MAX_DESCRIBE_LIMIT)
        .map(|batch| {
            let mut params = indexed("volumes", batch);
            params.push(single("limit", batch.len().to_string()));
            params
        })
        .collect()
}

impl BlockStorage for QingCloudStorage {
    fn describe_volumes<'a>(&'a self, volume_ids: &'a [String]) -> StorageFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let mut volumes = Vec::new();
            for params in describe_batches(volume_ids) {
                let response: DescribeVolumesResponse =
                    self.call("DescribeVolumes", params).await?;
                volumes.extend(
                    response
                        .volume_set
                        .into_iter()
                        .filter(|item| !item.is_gone())
                        .map(types::VolumeItem::into_volume),
                );
            }
            Ok(volumes)
        })
    }

    fn create_volumes<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> StorageFuture<'a, CreatedVolume> {
        Box::pin(async move {
            let mut params = vec![
                single("size", request.capacity_gb.to_string()),
                single("volume_name", request.name.clone()),
                single("count", "1"),
            ];
            if let Some(volume_type) = request.volume_type {
                params.push(single("volume_type", volume_type.code().to_string()));
            }
            let response: CreateVolumesResponse = self.call("CreateVolumes", params).await?;
            let volume_id = response.volumes.into_iter().next().ok_or_else(|| {
                ProviderError::transport("CreateVolumes: response lists no volume")
            })?;
            info!(volume_id = %volume_id, job_id = %response.job_id, "volume creation accepted");
            Ok(CreatedVolume {
                volume_id,
                job_id: JobId::from(response.job_id),
            })
        })
    }

    fn delete_volumes<'a>(&'a self, volume_ids: &'a [String]) -> StorageFuture<'a, JobId> {
        Box::pin(async move {
            let response: JobResponse = self
                .call("DeleteVolumes", indexed("volumes", volume_ids))
                .await?;
            Ok(JobId::from(response.job_id))
        })
    }

    fn attach_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
        instance_id: &'a InstanceId,
    ) -> StorageFuture<'a, JobId> {
        Box::pin(async move {
            let mut params = indexed("volumes", volume_ids);
            params.push(single("instance", instance_id.as_str()));
            let response: JobResponse = self.call("AttachVolumes", params).await?;
            Ok(JobId::from(response.job_id))
        })
    }

    fn detach_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
        instance_id: &'a InstanceId,
    ) -> StorageFuture<'a, JobId> {
        Box::pin(async move {
            let mut params = indexed("volumes", volume_ids);
            params.push(single("instance", instance_id.as_str()));
            let response: JobResponse = self.call("DetachVolumes", params).await?;
            Ok(JobId::from(response.job_id))
        })
    }

    fn describe_job<'a>(&'a self, job_id: &'a JobId) -> StorageFuture<'a, Option<JobStatus>> {
        Box::pin(async move {
            let params = vec![single("jobs.1", job_id.as_str()), single("verbose", "0")];
            let response: DescribeJobsResponse = self.call("DescribeJobs", params).await?;
            Ok(response
                .job_set
                .into_iter()
                .find(|job| job.job_id == job_id.as_str())
                .map(|job| job_status(&job.status)))
        })
    }
}

#[cfg(test)]
mod tests;
