//! Command-line interface definitions for the `flexvol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.
//! Positionals are optional: the driver answers a short argument list with
//! a failure envelope rather than a clap usage error.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `flexvol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "flexvol",
    version,
    about = "Flex-volume driver for QingCloud block storage volumes"
)]
pub(crate) struct Cli {
    /// Dry run: exit successfully without output to prove the binary runs.
    #[arg(long, global = true)]
    pub(crate) test: bool,
    /// Driver call issued by the node agent.
    #[command(subcommand)]
    pub(crate) call: Option<DriverCall>,
}

/// Driver calls, one per verb.
#[derive(Debug, Subcommand)]
pub(crate) enum DriverCall {
    /// Report driver capabilities.
    #[command(name = "init")]
    Init,
    /// Attach a volume to the node's instance and print its device path.
    #[command(name = "attach")]
    Attach {
        /// Volume options in JSON format.
        #[arg(value_name = "JSON_OPTIONS")]
        options: Option<String>,
        /// Node name, which is the instance ID.
        #[arg(value_name = "NODE_NAME")]
        node: Option<String>,
    },
    /// Detach the volume named by the path's last component.
    #[command(name = "detach")]
    Detach {
        /// Path ending in the volume ID.
        #[arg(value_name = "DEVICE_PATH")]
        device: Option<String>,
        /// Node name, which is the instance ID.
        #[arg(value_name = "NODE_NAME")]
        node: Option<String>,
    },
    /// Format the device if blank and mount it.
    #[command(name = "mountdevice")]
    MountDevice {
        /// Directory to mount on; created when missing.
        #[arg(value_name = "MOUNT_PATH")]
        mount_path: Option<String>,
        /// Block device to mount.
        #[arg(value_name = "DEVICE_PATH")]
        device: Option<String>,
        /// Volume options in JSON format.
        #[arg(value_name = "JSON_OPTIONS")]
        options: Option<String>,
    },
    /// Unmount a directory and remove it.
    #[command(name = "unmountdevice")]
    UnmountDevice {
        /// Directory to unmount.
        #[arg(value_name = "MOUNT_PATH")]
        mount_path: Option<String>,
    },
    /// Wait for an attached device path to appear.
    #[command(name = "waitforattach")]
    WaitForAttach {
        /// Device expected to appear.
        #[arg(value_name = "DEVICE_PATH")]
        device: Option<String>,
        /// Volume options in JSON format.
        #[arg(value_name = "JSON_OPTIONS")]
        options: Option<String>,
    },
    /// Print the unique volume name.
    #[command(name = "getvolumename")]
    GetVolumeName {
        /// Volume options in JSON format.
        #[arg(value_name = "JSON_OPTIONS")]
        options: Option<String>,
    },
    /// Report whether the volume is attached to the node's instance.
    #[command(name = "isattached")]
    IsAttached {
        /// Volume options in JSON format.
        #[arg(value_name = "JSON_OPTIONS")]
        options: Option<String>,
        /// Node name, which is the instance ID.
        #[arg(value_name = "NODE_NAME")]
        node: Option<String>,
    },
    /// Any other verb; answered as not supported.
    #[command(external_subcommand)]
    Unsupported(Vec<String>),
}
