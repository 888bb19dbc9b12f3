//! Per-node adapter between orchestrator volume specs and the volume
//! manager.
//!
//! No state is held between calls; the node agent retries whole
//! invocations, so every operation converges when repeated.

mod error;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::time::Duration;

use camino::Utf8Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::manager::{VolumeError, VolumeManager};
use crate::mount::{FsType, MountError, Mounter, READ_ONLY_OPTION};
use crate::poll::{FirstPoll, PollError, Probe, poll_until};
use crate::storage::{BlockStorage, ProviderErrorKind};
use crate::volume::InstanceId;

pub use error::AttachDetachError;

const MOUNT_DIR_MODE: u32 = 0o750;

/// Orchestrator-side description of a volume, supplied per call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeSpec {
    /// Provider volume identifier.
    pub volume_id: String,
    /// Filesystem to create or expect on the device.
    pub fs_type: FsType,
    /// Whether the volume is mounted read-only.
    pub read_only: bool,
}

impl VolumeSpec {
    /// Creates a read-write ext4 spec for `volume_id`.
    #[must_use]
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            ..Self::default()
        }
    }
}

/// Maps a node name to the instance hosting it. Nodes are registered
/// under their instance identifier.
#[must_use]
pub fn instance_id_for_node(node: &str) -> InstanceId {
    InstanceId::from(node.trim())
}

/// Outcome of a batch attachment check.
///
/// When the provider query fails every volume is reported as attached so
/// the caller never detaches on missing information; the error is kept
/// alongside.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachmentReport {
    /// Attachment per volume ID.
    pub attached: BTreeMap<String, bool>,
    /// Provider failure that forced the fail-safe default.
    pub error: Option<VolumeError>,
}

/// Drives attach, detach, and mount steps for one node.
#[derive(Clone, Debug)]
pub struct AttachDetachOrchestrator<S, M> {
    manager: VolumeManager<S>,
    mounter: M,
    device_poll_interval: Duration,
}

impl<S, M> AttachDetachOrchestrator<S, M>
where
    S: BlockStorage,
    M: Mounter,
{
    /// Creates an orchestrator probing device paths every
    /// `device_poll_interval`.
    #[must_use]
    pub const fn new(manager: VolumeManager<S>, mounter: M, device_poll_interval: Duration) -> Self {
        Self {
            manager,
            mounter,
            device_poll_interval,
        }
    }

    /// Borrow the volume manager.
    #[must_use]
    pub const fn manager(&self) -> &VolumeManager<S> {
        &self.manager
    }

    /// Borrow the mounter.
    #[must_use]
    pub const fn mounter(&self) -> &M {
        &self.mounter
    }

    /// Attaches the volume to the node's instance and returns the device.
    ///
    /// A provider rejection saying the volume is already attached is
    /// checked against a fresh describe: it counts as success only when
    /// the volume is bound to this node's instance.
    ///
    /// # Errors
    ///
    /// Returns [`AttachDetachError::Volume`] when the attach fails, or when
    /// the volume turns out to be attached to another instance.
    pub async fn attach(&self, spec: &VolumeSpec, node: &str) -> Result<String, AttachDetachError> {
        let instance_id = instance_id_for_node(node);
        match self
            .manager
            .attach_volume(&spec.volume_id, &instance_id)
            .await
        {
            Ok(device) => Ok(device),
            Err(VolumeError::Provider(err)) if err.kind() == ProviderErrorKind::AlreadyAttached => {
                warn!(
                    volume_id = %spec.volume_id,
                    instance_id = %instance_id,
                    error = %err,
                    "provider reports volume already attached"
                );
                match self
                    .manager
                    .attached_device(&spec.volume_id, &instance_id)
                    .await?
                {
                    Some(device) => Ok(device),
                    None => Err(VolumeError::Provider(err).into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Waits until `device_path` exists locally and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`AttachDetachError::Precondition`] for an empty path and
    /// [`AttachDetachError::Timeout`] when the device does not appear.
    pub async fn wait_for_attach(
        &self,
        device_path: &str,
        timeout: Duration,
    ) -> Result<String, AttachDetachError> {
        if device_path.trim().is_empty() {
            return Err(AttachDetachError::Precondition(String::from(
                "waitForAttach failed: device path is empty",
            )));
        }

        let outcome = poll_until(
            timeout,
            self.device_poll_interval,
            FirstPoll::AfterInterval,
            move || async move {
                match fs::try_exists(device_path).await {
                    Ok(true) => Ok::<_, AttachDetachError>(Probe::Ready(())),
                    Ok(false) => Ok(Probe::Pending),
                    Err(err) => {
                        warn!(device_path, error = %err, "failed to probe device path");
                        Ok(Probe::Pending)
                    }
                }
            },
        )
        .await;

        match outcome {
            Ok(()) => {
                info!(device_path, "device path is present");
                Ok(device_path.to_owned())
            }
            Err(PollError::Elapsed) => Err(AttachDetachError::Timeout {
                action: "attach",
                device_path: device_path.to_owned(),
                timeout,
            }),
            Err(PollError::Probe(err)) => Err(err),
        }
    }

    /// Reports attachment for every spec with one provider query.
    ///
    /// On provider failure every spec maps to `true` and the error is
    /// returned in the report.
    pub async fn volumes_are_attached(&self, specs: &[VolumeSpec], node: &str) -> AttachmentReport {
        let instance_id = instance_id_for_node(node);
        let volume_ids: Vec<String> = specs.iter().map(|spec| spec.volume_id.clone()).collect();

        match self
            .manager
            .disks_are_attached(&volume_ids, &instance_id)
            .await
        {
            Ok(attached) => AttachmentReport {
                attached,
                error: None,
            },
            Err(err) => {
                warn!(instance_id = %instance_id, error = %err, "assuming volumes stay attached");
                AttachmentReport {
                    attached: volume_ids.into_iter().map(|id| (id, true)).collect(),
                    error: Some(err),
                }
            }
        }
    }

    /// Reports whether the spec's volume is attached to the node's
    /// instance. Unknown volumes report `false`.
    ///
    /// # Errors
    ///
    /// Returns [`AttachDetachError::Volume`] when the provider query fails.
    pub async fn is_attached(&self, spec: &VolumeSpec, node: &str) -> Result<bool, AttachDetachError> {
        let instance_id = instance_id_for_node(node);
        Ok(self
            .manager
            .volume_is_attached(&spec.volume_id, &instance_id)
            .await?)
    }

    /// Detaches the volume named by the last component of
    /// `device_mount_path` from the node's instance.
    ///
    /// A volume reported as not attached short-circuits. If the check
    /// itself fails the detach is attempted anyway.
    ///
    /// # Errors
    ///
    /// Returns [`AttachDetachError::Precondition`] when no volume ID can be
    /// derived and [`AttachDetachError::Volume`] when the detach fails.
    pub async fn detach(&self, device_mount_path: &str, node: &str) -> Result<(), AttachDetachError> {
        let volume_id = volume_id_from_path(device_mount_path)?;
        let instance_id = instance_id_for_node(node);

        match self
            .manager
            .volume_is_attached(volume_id, &instance_id)
            .await
        {
            Ok(false) => {
                info!(volume_id, instance_id = %instance_id, "volume already detached");
                return Ok(());
            }
            Ok(true) => {}
            Err(err) => {
                warn!(
                    volume_id,
                    instance_id = %instance_id,
                    error = %err,
                    "attachment check failed, detaching anyway"
                );
            }
        }

        self.manager
            .detach_volume(volume_id, &instance_id)
            .await
            .map_err(AttachDetachError::from)
    }

    /// Waits until `device_path` no longer exists locally.
    ///
    /// # Errors
    ///
    /// Returns [`AttachDetachError::DeviceProbe`] when the path cannot be
    /// probed and [`AttachDetachError::Timeout`] when it does not vanish.
    pub async fn wait_for_detach(
        &self,
        device_path: &str,
        timeout: Duration,
    ) -> Result<(), AttachDetachError> {
        let outcome = poll_until(
            timeout,
            self.device_poll_interval,
            FirstPoll::AfterInterval,
            move || async move {
                match fs::try_exists(device_path).await {
                    Ok(false) => Ok(Probe::Ready(())),
                    Ok(true) => {
                        debug!(device_path, "device path still present");
                        Ok(Probe::Pending)
                    }
                    Err(err) => Err(AttachDetachError::DeviceProbe {
                        device_path: device_path.to_owned(),
                        message: err.to_string(),
                    }),
                }
            },
        )
        .await;

        outcome.map_err(|err| match err {
            PollError::Elapsed => AttachDetachError::Timeout {
                action: "detach",
                device_path: device_path.to_owned(),
                timeout,
            },
            PollError::Probe(inner) => inner,
        })
    }

    /// Mounts `device_path` on `mount_path`, formatting when needed.
    ///
    /// Already-mounted paths are left untouched. A missing mount path is
    /// created; if formatting or mounting fails the directory is removed
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AttachDetachError::Mount`] when probing, creating, or
    /// mounting fails.
    pub async fn mount_device(
        &self,
        spec: &VolumeSpec,
        device_path: &str,
        mount_path: &Utf8Path,
    ) -> Result<(), AttachDetachError> {
        let not_mount_point = match self.mounter.is_likely_not_mount_point(mount_path) {
            Ok(value) => value,
            Err(MountError::MissingPath { .. }) => {
                create_mount_dir(mount_path).await?;
                true
            }
            Err(err) => return Err(err.into()),
        };
        if !not_mount_point {
            debug!(mount_path = %mount_path, "already mounted");
            return Ok(());
        }

        let options = if spec.read_only {
            vec![String::from(READ_ONLY_OPTION)]
        } else {
            Vec::new()
        };
        if let Err(err) =
            self.mounter
                .format_and_mount(device_path, mount_path, spec.fs_type, &options)
        {
            if let Err(cleanup) = fs::remove_dir(mount_path).await {
                warn!(mount_path = %mount_path, error = %cleanup, "failed to remove mount directory");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Unmounts `mount_path` and removes the directory.
    ///
    /// # Errors
    ///
    /// Returns [`AttachDetachError::Mount`] when unmounting fails.
    pub fn unmount_device(&self, mount_path: &Utf8Path) -> Result<(), AttachDetachError> {
        info!(mount_path = %mount_path, "unmounting device");
        Ok(self.mounter.unmount(mount_path)?)
    }
}

fn volume_id_from_path(device_mount_path: &str) -> Result<&str, AttachDetachError> {
    Utf8Path::new(device_mount_path.trim())
        .file_name()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AttachDetachError::Precondition(format!(
                "cannot derive a volume ID from '{device_mount_path}'"
            ))
        })
}

async fn create_mount_dir(mount_path: &Utf8Path) -> Result<(), MountError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(MOUNT_DIR_MODE);
    match builder.create(mount_path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(MountError::Io {
            action: "create",
            path: mount_path.to_string(),
            message: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests;
