//! Argument checks for a driver call, run before configuration or the
//! provider are touched.

use camino::Utf8PathBuf;
use thiserror::Error;

use super::options::{OptionsError, VolumeOptions};
use super::result::VolumeResult;
use crate::attacher::VolumeSpec;

/// Verbs accepted by the driver, as printed in the usage message.
pub const VERBS: &str = "init|attach|detach|mountdevice|unmountdevice|waitforattach|getvolumename|isattached";

const ATTACH_ARGS: &str = "attach requires options in json format and a node name";
const DETACH_ARGS: &str = "detach requires a device path and a node name";
const MOUNT_DEVICE_ARGS: &str = "mountdevice requires a mount path, a device path and mount options";
const UNMOUNT_DEVICE_ARGS: &str = "unmountdevice requires a mount path";
const WAIT_FOR_ATTACH_ARGS: &str = "waitforattach requires a device path and options in json format";
const GET_VOLUME_NAME_ARGS: &str = "getvolumename requires options in json format";
const IS_ATTACHED_ARGS: &str = "isattached requires options in json format and a node name";

/// Raw driver call as received on the command line. Positionals are
/// optional so a short argument list still yields a result envelope.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Invocation {
    /// No verb was given.
    Usage {
        /// Name the binary was invoked as.
        program: String,
    },
    /// `init`.
    Init,
    /// `attach <jsonOptions> <nodeName>`.
    Attach {
        /// Raw options JSON.
        options: Option<String>,
        /// Node name.
        node: Option<String>,
    },
    /// `detach <devicePath> <nodeName>`.
    Detach {
        /// Path whose last component names the volume.
        device: Option<String>,
        /// Node name.
        node: Option<String>,
    },
    /// `mountdevice <mountPath> <devicePath> <jsonOptions>`.
    MountDevice {
        /// Directory to mount on.
        mount_path: Option<String>,
        /// Block device to mount.
        device: Option<String>,
        /// Raw options JSON.
        options: Option<String>,
    },
    /// `unmountdevice <mountPath>`.
    UnmountDevice {
        /// Directory to unmount.
        mount_path: Option<String>,
    },
    /// `waitforattach <devicePath> <jsonOptions>`.
    WaitForAttach {
        /// Device expected to appear.
        device: Option<String>,
        /// Raw options JSON.
        options: Option<String>,
    },
    /// `getvolumename <jsonOptions>`.
    GetVolumeName {
        /// Raw options JSON.
        options: Option<String>,
    },
    /// `isattached <jsonOptions> <nodeName>`.
    IsAttached {
        /// Raw options JSON.
        options: Option<String>,
        /// Node name.
        node: Option<String>,
    },
    /// Any other verb.
    Unsupported(String),
}

/// A validated call that needs the provider or the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriverRequest {
    /// Attach the volume to the node's instance.
    Attach {
        /// Volume to attach.
        spec: VolumeSpec,
        /// Node name.
        node: String,
    },
    /// Detach the volume named by `device` from the node's instance.
    Detach {
        /// Path whose last component names the volume.
        device: String,
        /// Node name.
        node: String,
    },
    /// Format if needed and mount the device.
    MountDevice {
        /// Volume being mounted.
        spec: VolumeSpec,
        /// Block device to mount.
        device: String,
        /// Directory to mount on.
        mount_path: Utf8PathBuf,
    },
    /// Unmount and remove the mount directory.
    UnmountDevice {
        /// Directory to unmount.
        mount_path: Utf8PathBuf,
    },
    /// Wait for the device path to appear.
    WaitForAttach {
        /// Device expected to appear.
        device: String,
    },
    /// Query whether the volume is attached to the node's instance.
    IsAttached {
        /// Volume to check.
        spec: VolumeSpec,
        /// Node name.
        node: String,
    },
}

impl DriverRequest {
    /// Verb that produced this request.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Attach { .. } => "attach",
            Self::Detach { .. } => "detach",
            Self::MountDevice { .. } => "mountdevice",
            Self::UnmountDevice { .. } => "unmountdevice",
            Self::WaitForAttach { .. } => "waitforattach",
            Self::IsAttached { .. } => "isattached",
        }
    }
}

/// Outcome of [`Invocation::prepare`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Prepared {
    /// The call was answered without the provider or the host.
    Done(VolumeResult),
    /// The call must be executed by the plugin.
    Call(DriverRequest),
}

/// Reasons a driver call is rejected before execution.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvocationError {
    /// No verb was supplied.
    #[error("Usage: {program} {}", VERBS)]
    Usage {
        /// Name the binary was invoked as.
        program: String,
    },
    /// A verb was supplied without its positional arguments.
    #[error("{0}")]
    MissingArguments(&'static str),
    /// The options JSON could not be used.
    #[error(transparent)]
    Options(#[from] OptionsError),
}

impl Invocation {
    /// Checks arguments and decodes options. Calls answerable without
    /// configuration, including every rejection, come back as
    /// [`Prepared::Done`].
    #[must_use]
    pub fn prepare(self) -> Prepared {
        self.try_prepare()
            .unwrap_or_else(|err| Prepared::Done(VolumeResult::failure(err.to_string())))
    }

    fn try_prepare(self) -> Result<Prepared, InvocationError> {
        let request = match self {
            Self::Usage { program } => return Err(InvocationError::Usage { program }),
            Self::Init => return Ok(Prepared::Done(VolumeResult::init())),
            Self::Unsupported(verb) => return Ok(Prepared::Done(VolumeResult::not_supported(&verb))),
            Self::GetVolumeName { options } => {
                let raw = require(options, GET_VOLUME_NAME_ARGS)?;
                let volume_id = VolumeOptions::from_json(&raw)?.volume_id()?.to_owned();
                return Ok(Prepared::Done(
                    VolumeResult::success().with_volume_name(volume_id),
                ));
            }
            Self::Attach { options, node } => {
                let (raw, node_name) = require_pair(options, node, ATTACH_ARGS)?;
                DriverRequest::Attach {
                    spec: decode_spec(&raw)?,
                    node: node_name,
                }
            }
            Self::IsAttached { options, node } => {
                let (raw, node_name) = require_pair(options, node, IS_ATTACHED_ARGS)?;
                DriverRequest::IsAttached {
                    spec: decode_spec(&raw)?,
                    node: node_name,
                }
            }
            Self::Detach { device, node } => {
                let (device_path, node_name) = require_pair(device, node, DETACH_ARGS)?;
                DriverRequest::Detach {
                    device: device_path,
                    node: node_name,
                }
            }
            Self::MountDevice {
                mount_path,
                device,
                options,
            } => {
                let (target, device_path) = require_pair(mount_path, device, MOUNT_DEVICE_ARGS)?;
                let raw = require(options, MOUNT_DEVICE_ARGS)?;
                DriverRequest::MountDevice {
                    spec: decode_spec(&raw)?,
                    device: device_path,
                    mount_path: Utf8PathBuf::from(target),
                }
            }
            Self::UnmountDevice { mount_path } => DriverRequest::UnmountDevice {
                mount_path: Utf8PathBuf::from(require(mount_path, UNMOUNT_DEVICE_ARGS)?),
            },
            Self::WaitForAttach { device, options } => {
                let (device_path, raw) = require_pair(device, options, WAIT_FOR_ATTACH_ARGS)?;
                VolumeOptions::from_json(&raw)?;
                DriverRequest::WaitForAttach {
                    device: device_path,
                }
            }
        };
        Ok(Prepared::Call(request))
    }
}

fn require(value: Option<String>, usage: &'static str) -> Result<String, InvocationError> {
    value.ok_or(InvocationError::MissingArguments(usage))
}

fn require_pair(
    first: Option<String>,
    second: Option<String>,
    usage: &'static str,
) -> Result<(String, String), InvocationError> {
    first
        .zip(second)
        .ok_or(InvocationError::MissingArguments(usage))
}

fn decode_spec(raw: &str) -> Result<VolumeSpec, OptionsError> {
    VolumeOptions::from_json(raw)?.to_spec()
}
