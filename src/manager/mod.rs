//! Cloud volume operations composed with job completion.
//!
//! Describe is the only trusted source of attachment state: a finished job
//! means the provider accepted and ran the operation, not that the device
//! path is already known. Nothing is cached between calls.

mod error;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::job::JobWaiter;
use crate::storage::{BlockStorage, ProviderErrorKind};
use crate::volume::{InstanceId, Volume, VolumeRequest, VolumeType};

pub use error::VolumeError;

/// Prefix applied to generated names when a create request has none.
pub const GENERATED_NAME_PREFIX: &str = "flexvol-";

/// Drives volume lifecycle calls against a [`BlockStorage`] provider.
#[derive(Clone, Debug)]
pub struct VolumeManager<S> {
    storage: S,
    waiter: JobWaiter,
    default_volume_type: VolumeType,
}

impl<S> VolumeManager<S>
where
    S: BlockStorage,
{
    /// Creates a manager over `storage`.
    ///
    /// `default_volume_type` is resolved once by the caller and applies to
    /// every create request that does not name a type.
    #[must_use]
    pub const fn new(storage: S, waiter: JobWaiter, default_volume_type: VolumeType) -> Self {
        Self {
            storage,
            waiter,
            default_volume_type,
        }
    }

    /// Borrow the underlying provider.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the configured default volume type. Performs no I/O.
    #[must_use]
    pub const fn default_volume_type(&self) -> VolumeType {
        self.default_volume_type
    }

    /// Attaches `volume_id` to `instance_id` and returns the device path.
    ///
    /// A volume already bound to the instance short-circuits with its
    /// current device and issues no mutating call.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] for API failures, job errors from
    /// the [`JobWaiter`], [`VolumeError::VolumeNotFound`] when the volume
    /// vanishes after the attach, and [`VolumeError::EmptyDevicePath`] when
    /// the provider has not assigned a device yet.
    pub async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &InstanceId,
    ) -> Result<String, VolumeError> {
        if let Some(volume) = self.describe_one(volume_id).await?
            && volume.is_attached_to(instance_id)
        {
            info!(volume_id, instance_id = %instance_id, "volume already attached");
            return device_of(&volume);
        }

        let ids = [volume_id.to_owned()];
        info!(volume_id, instance_id = %instance_id, "attaching volume");
        let job_id = self.storage.attach_volumes(&ids, instance_id).await?;
        self.waiter.wait(&self.storage, &job_id).await?;

        let volume =
            self.describe_one(volume_id)
                .await?
                .ok_or_else(|| VolumeError::VolumeNotFound {
                    volume_id: volume_id.to_owned(),
                    action: "attach",
                })?;
        device_of(&volume)
    }

    /// Detaches `volume_id` from `instance_id` and waits for the job.
    ///
    /// No attachment pre-check is made here; callers decide whether the
    /// detach is needed.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] for API failures and job errors
    /// from the [`JobWaiter`].
    pub async fn detach_volume(
        &self,
        volume_id: &str,
        instance_id: &InstanceId,
    ) -> Result<(), VolumeError> {
        let ids = [volume_id.to_owned()];
        info!(volume_id, instance_id = %instance_id, "detaching volume");
        let job_id = self.storage.detach_volumes(&ids, instance_id).await?;
        self.waiter.wait(&self.storage, &job_id).await
    }

    /// Creates a volume and returns its identifier.
    ///
    /// A blank name is replaced with a generated one and a missing type
    /// falls back to the configured default. The volume ID is known as soon
    /// as the provider accepts the request, so failures while waiting on
    /// the provisioning job are logged rather than returned.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the create call fails.
    pub async fn create_volume(&self, request: &VolumeRequest) -> Result<String, VolumeError> {
        let name = if request.name.is_empty() {
            format!("{GENERATED_NAME_PREFIX}{}", Uuid::new_v4().simple())
        } else {
            request.name.clone()
        };
        let volume_type = request.volume_type.unwrap_or(self.default_volume_type);
        let resolved = VolumeRequest::new(name, request.capacity_gb).volume_type(Some(volume_type));

        info!(
            name = %resolved.name,
            capacity_gb = resolved.capacity_gb,
            volume_type = %volume_type,
            "creating volume"
        );
        let created = self.storage.create_volumes(&resolved).await?;
        if let Err(err) = self.waiter.wait(&self.storage, &created.job_id).await {
            warn!(volume_id = %created.volume_id, error = %err, "create job did not complete");
        }
        Ok(created.volume_id)
    }

    /// Deletes `volume_id`, returning whether this call removed it.
    ///
    /// A volume the provider reports as already deleted, or no longer
    /// knows, yields `Ok(false)`. Job wait failures are logged.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] for any other API failure.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<bool, VolumeError> {
        let ids = [volume_id.to_owned()];
        info!(volume_id, "deleting volume");
        let job_id = match self.storage.delete_volumes(&ids).await {
            Ok(job_id) => job_id,
            Err(err)
                if matches!(
                    err.kind(),
                    ProviderErrorKind::AlreadyDeleted | ProviderErrorKind::NotFound
                ) =>
            {
                info!(volume_id, "volume already deleted");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = self.waiter.wait(&self.storage, &job_id).await {
            warn!(volume_id, error = %err, "delete job did not complete");
        }
        Ok(true)
    }

    /// Reports whether `volume_id` is attached to `instance_id`.
    ///
    /// An unknown volume is reported as not attached.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the describe call fails.
    pub async fn volume_is_attached(
        &self,
        volume_id: &str,
        instance_id: &InstanceId,
    ) -> Result<bool, VolumeError> {
        let attached = self
            .describe_one(volume_id)
            .await?
            .is_some_and(|volume| volume.is_attached_to(instance_id));
        debug!(volume_id, instance_id = %instance_id, attached, "checked attachment");
        Ok(attached)
    }

    /// Returns the device of `volume_id` when it is bound to
    /// `instance_id`, and `None` when it is absent or bound elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the describe call fails and
    /// [`VolumeError::EmptyDevicePath`] when the binding has no device yet.
    pub async fn attached_device(
        &self,
        volume_id: &str,
        instance_id: &InstanceId,
    ) -> Result<Option<String>, VolumeError> {
        match self.describe_one(volume_id).await? {
            Some(volume) if volume.is_attached_to(instance_id) => device_of(&volume).map(Some),
            _ => Ok(None),
        }
    }

    /// Reports attachment for every ID in `volume_ids` with one describe.
    ///
    /// The map holds exactly one entry per distinct input ID; IDs the
    /// provider omits or binds elsewhere map to `false`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the describe call fails.
    pub async fn disks_are_attached(
        &self,
        volume_ids: &[String],
        instance_id: &InstanceId,
    ) -> Result<BTreeMap<String, bool>, VolumeError> {
        let mut attached: BTreeMap<String, bool> =
            volume_ids.iter().map(|id| (id.clone(), false)).collect();
        if attached.is_empty() {
            return Ok(attached);
        }

        let volumes = self.storage.describe_volumes(volume_ids).await?;
        for volume in volumes {
            if volume.is_attached_to(instance_id)
                && let Some(entry) = attached.get_mut(&volume.id)
            {
                *entry = true;
            }
        }
        Ok(attached)
    }

    async fn describe_one(&self, volume_id: &str) -> Result<Option<Volume>, VolumeError> {
        let ids = [volume_id.to_owned()];
        let volumes = self.storage.describe_volumes(&ids).await?;
        Ok(volumes.into_iter().find(|volume| volume.id == volume_id))
    }
}

fn device_of(volume: &Volume) -> Result<String, VolumeError> {
    volume
        .device()
        .map(str::to_owned)
        .ok_or_else(|| VolumeError::EmptyDevicePath {
            volume_id: volume.id.clone(),
        })
}
