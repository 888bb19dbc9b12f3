//! Mounter backed by `/proc/mounts` and the host's mount tools.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use super::{FsType, MountError, Mounter, READ_ONLY_OPTION};
use crate::command::{CommandOutput, CommandRunner};

/// Kernel mount table consulted by default.
pub const PROC_MOUNTS: &str = "/proc/mounts";

const NOT_MOUNTED_MARKERS: [&str; 2] = ["not mounted", "no mount point"];

/// [`Mounter`] that shells out through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct SystemMounter<R> {
    runner: R,
    mounts_file: Utf8PathBuf,
}

impl<R> SystemMounter<R>
where
    R: CommandRunner,
{
    /// Creates a mounter reading the kernel mount table.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self::with_mounts_file(runner, PROC_MOUNTS)
    }

    /// Creates a mounter reading an alternate mount table.
    #[must_use]
    pub fn with_mounts_file(runner: R, mounts_file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            runner,
            mounts_file: mounts_file.into(),
        }
    }

    /// Mount points are compared as paths, so trailing and repeated
    /// separators do not matter.
    fn is_mounted(&self, target: &Utf8Path) -> Result<bool, MountError> {
        let table = fs::read_to_string(&self.mounts_file).map_err(|err| MountError::Io {
            action: "read",
            path: self.mounts_file.to_string(),
            message: err.to_string(),
        })?;
        Ok(table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|mount_point| Utf8Path::new(&unescape_mount_field(mount_point)) == target))
    }

    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, MountError> {
        Ok(self.runner.run(program, args)?)
    }

    fn run_checked(&self, program: &str, args: &[OsString]) -> Result<(), MountError> {
        let output = self.run(program, args)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(MountError::CommandFailed {
                program: program.to_owned(),
                message: output.diagnostic().to_owned(),
            })
        }
    }

    fn needs_formatting(&self, device: &str) -> Result<bool, MountError> {
        let output = self.run("blkid", &[OsString::from("-p"), OsString::from(device)])?;
        // blkid exits non-zero when it finds no filesystem signature.
        Ok(!output.is_success() || !output.stdout.contains("TYPE="))
    }
}

impl<R> Mounter for SystemMounter<R>
where
    R: CommandRunner,
{
    fn is_likely_not_mount_point(&self, path: &Utf8Path) -> Result<bool, MountError> {
        if !path.exists() {
            return Err(MountError::MissingPath {
                path: path.to_string(),
            });
        }
        Ok(!self.is_mounted(path)?)
    }

    fn format_and_mount(
        &self,
        device: &str,
        target: &Utf8Path,
        fs_type: FsType,
        options: &[String],
    ) -> Result<(), MountError> {
        let read_only = options.iter().any(|option| option == READ_ONLY_OPTION);
        if !read_only && self.needs_formatting(device)? {
            let (program, force) = fs_type.mkfs();
            info!(device, fs_type = %fs_type, "formatting device");
            self.run_checked(program, &[OsString::from(force), OsString::from(device)])?;
        }

        let mut args = vec![OsString::from("-t"), OsString::from(fs_type.as_str())];
        if !options.is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(options.join(",")));
        }
        args.push(OsString::from(device));
        args.push(OsString::from(target.as_str()));
        info!(device, target = %target, fs_type = %fs_type, read_only, "mounting device");
        self.run_checked("mount", &args)
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError> {
        if self.is_mounted(target)? {
            info!(target = %target, "unmounting");
            let output = self.run("umount", &[OsString::from(target.as_str())])?;
            if !output.is_success() {
                let message = output.diagnostic();
                if NOT_MOUNTED_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
                {
                    warn!(target = %target, "path was not mounted");
                } else {
                    return Err(MountError::CommandFailed {
                        program: String::from("umount"),
                        message: message.to_owned(),
                    });
                }
            }
        } else {
            debug!(target = %target, "path is not mounted, skipping unmount");
        }

        match fs::remove_dir(target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MountError::Io {
                action: "remove",
                path: target.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// Decodes the octal escapes the kernel uses for whitespace and backslashes
/// in mount table fields.
pub(crate) fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
