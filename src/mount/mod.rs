//! Local mount, format, and unmount primitives.

mod error;
mod system;

use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;

pub use error::MountError;
pub use system::{PROC_MOUNTS, SystemMounter};

/// Mount option requesting a read-only mount.
pub const READ_ONLY_OPTION: &str = "ro";

/// Filesystems the plugin can format and mount.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FsType {
    /// ext4, the default.
    #[default]
    Ext4,
    /// ext3.
    Ext3,
    /// XFS.
    Xfs,
}

impl FsType {
    /// Name passed to `mount -t`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Ext3 => "ext3",
            Self::Xfs => "xfs",
        }
    }

    /// Program and force flag used to create the filesystem.
    #[must_use]
    pub const fn mkfs(self) -> (&'static str, &'static str) {
        match self {
            Self::Ext4 => ("mkfs.ext4", "-F"),
            Self::Ext3 => ("mkfs.ext3", "-F"),
            Self::Xfs => ("mkfs.xfs", "-f"),
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsType {
    type Err = MountError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "ext4" => Ok(Self::Ext4),
            "ext3" => Ok(Self::Ext3),
            "xfs" => Ok(Self::Xfs),
            _ => Err(MountError::UnsupportedFsType {
                fs_type: raw.to_owned(),
            }),
        }
    }
}

/// Local mount operations used by the attach/detach orchestrator.
pub trait Mounter {
    /// Returns `true` when `path` is probably not a mount point.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::MissingPath`] when `path` does not exist and
    /// [`MountError::Io`] when the mount table cannot be read.
    fn is_likely_not_mount_point(&self, path: &Utf8Path) -> Result<bool, MountError>;

    /// Formats `device` when it carries no filesystem, then mounts it on
    /// `target`. Read-only mounts are never formatted.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when probing, formatting, or mounting fails.
    fn format_and_mount(
        &self,
        device: &str,
        target: &Utf8Path,
        fs_type: FsType,
        options: &[String],
    ) -> Result<(), MountError>;

    /// Unmounts `target` when mounted and removes the directory.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when `umount` fails or the directory cannot be
    /// removed.
    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError>;
}

#[cfg(test)]
mod tests;
