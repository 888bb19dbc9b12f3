//! Unit tests for mount primitives.

use super::system::unescape_mount_field;
use super::*;
use crate::test_support::ScriptedRunner;
use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use std::fs;
use tempfile::TempDir;

struct Host {
    _dir: TempDir,
    mounts: Utf8PathBuf,
    target: Utf8PathBuf,
    runner: ScriptedRunner,
}

impl Host {
    fn mounter(&self) -> SystemMounter<ScriptedRunner> {
        SystemMounter::with_mounts_file(self.runner.clone(), self.mounts.clone())
    }

    fn mark_mounted(&self) {
        let line = format!("/dev/vdb {} ext4 rw,relatime 0 0\n", self.target);
        fs::write(&self.mounts, line).expect("write mount table");
    }
}

#[fixture]
fn host() -> Host {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    let mounts = root.join("mounts");
    fs::write(&mounts, "proc /proc proc rw 0 0\n").expect("write mount table");
    let target = root.join("vol-1");
    fs::create_dir(&target).expect("create target");
    Host {
        _dir: dir,
        mounts,
        target,
        runner: ScriptedRunner::new(),
    }
}

#[rstest]
#[case("", FsType::Ext4)]
#[case("EXT4", FsType::Ext4)]
#[case("ext3", FsType::Ext3)]
#[case(" xfs ", FsType::Xfs)]
fn fs_type_parses_supported_names(#[case] raw: &str, #[case] expected: FsType) {
    assert_eq!(raw.parse::<FsType>(), Ok(expected));
}

#[test]
fn fs_type_rejects_unknown_names() {
    let err = "ntfs".parse::<FsType>().expect_err("ntfs is unsupported");
    assert_eq!(
        err,
        MountError::UnsupportedFsType {
            fs_type: String::from("ntfs")
        }
    );
}

#[test]
fn mount_fields_are_unescaped() {
    assert_eq!(unescape_mount_field("/mnt/my\\040disk"), "/mnt/my disk");
}

#[rstest]
fn missing_path_is_reported(host: Host) {
    let missing = host.target.join("absent");
    let err = host
        .mounter()
        .is_likely_not_mount_point(&missing)
        .expect_err("path is missing");
    assert!(matches!(err, MountError::MissingPath { .. }));
}

#[rstest]
fn mount_point_detection_reads_mount_table(host: Host) {
    let mounter = host.mounter();
    assert!(
        mounter
            .is_likely_not_mount_point(&host.target)
            .expect("probe")
    );

    host.mark_mounted();
    assert!(
        !mounter
            .is_likely_not_mount_point(&host.target)
            .expect("probe")
    );
}

#[rstest]
#[case::trailing_slash(
    (|target: &Utf8Path| format!("{target}/")) as fn(&Utf8Path) -> String,
    (|target: &Utf8Path| target.to_string()) as fn(&Utf8Path) -> String
)]
#[case::repeated_separator(
    (|target: &Utf8Path| target.to_string()) as fn(&Utf8Path) -> String,
    (|target: &Utf8Path| target.as_str().replace("/vol-1", "//vol-1")) as fn(&Utf8Path) -> String
)]
fn mount_point_detection_ignores_separator_spelling(
    host: Host,
    #[case] queried: fn(&Utf8Path) -> String,
    #[case] recorded: fn(&Utf8Path) -> String,
) {
    let line = format!("/dev/vdb {} ext4 rw,relatime 0 0\n", recorded(&host.target));
    fs::write(&host.mounts, line).expect("write mount table");
    let query = Utf8PathBuf::from(queried(&host.target));

    assert!(
        !host
            .mounter()
            .is_likely_not_mount_point(&query)
            .expect("mount table lookup")
    );
}

#[rstest]
fn unmount_with_trailing_slash_runs_umount(host: Host) {
    host.mark_mounted();
    host.runner.push_success();
    let query = Utf8PathBuf::from(format!("{}/", host.target));

    host.mounter().unmount(&query).expect("unmount");

    assert_eq!(host.runner.invocations().len(), 1);
    assert!(!host.target.exists());
}

#[rstest]
fn blank_device_is_formatted_before_mount(host: Host) {
    host.runner.push_failure(2, "");
    host.runner.push_success();
    host.runner.push_success();

    host.mounter()
        .format_and_mount("/dev/vdb", &host.target, FsType::Ext4, &[])
        .expect("format and mount");

    assert_eq!(
        host.runner.command_strings(),
        vec![
            String::from("blkid -p /dev/vdb"),
            String::from("mkfs.ext4 -F /dev/vdb"),
            format!("mount -t ext4 /dev/vdb {}", host.target),
        ]
    );
}

#[rstest]
fn formatted_device_is_mounted_without_mkfs(host: Host) {
    host.runner
        .push_output(Some(0), "/dev/vdb: UUID=\"1\" TYPE=\"xfs\"", "");
    host.runner.push_success();

    host.mounter()
        .format_and_mount("/dev/vdb", &host.target, FsType::Xfs, &[])
        .expect("mount");

    let commands = host.runner.command_strings();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|cmd| !cmd.starts_with("mkfs")));
}

#[rstest]
fn read_only_mount_skips_probe_and_passes_option(host: Host) {
    host.runner.push_success();

    host.mounter()
        .format_and_mount(
            "/dev/vdb",
            &host.target,
            FsType::Ext4,
            &[String::from(READ_ONLY_OPTION)],
        )
        .expect("mount");

    assert_eq!(
        host.runner.command_strings(),
        vec![format!("mount -t ext4 -o ro /dev/vdb {}", host.target)]
    );
}

#[rstest]
fn mount_failure_surfaces_stderr(host: Host) {
    host.runner.push_output(Some(0), "TYPE=\"ext4\"", "");
    host.runner.push_failure(32, "wrong fs type");

    let err = host
        .mounter()
        .format_and_mount("/dev/vdb", &host.target, FsType::Ext4, &[])
        .expect_err("mount should fail");

    assert_eq!(
        err,
        MountError::CommandFailed {
            program: String::from("mount"),
            message: String::from("wrong fs type"),
        }
    );
}

#[rstest]
fn unmount_skips_umount_when_not_mounted_and_removes_dir(host: Host) {
    host.mounter().unmount(&host.target).expect("unmount");

    assert!(host.runner.invocations().is_empty());
    assert!(!host.target.exists());
}

#[rstest]
fn unmount_tolerates_not_mounted_stderr(host: Host) {
    host.mark_mounted();
    host.runner
        .push_failure(32, "umount: /mnt/vol-1: not mounted.");

    host.mounter().unmount(&host.target).expect("unmount");

    assert_eq!(host.runner.invocations().len(), 1);
    assert!(!host.target.exists());
}

#[rstest]
fn unmount_failure_keeps_directory(host: Host) {
    host.mark_mounted();
    host.runner.push_failure(32, "target is busy");

    let err = host
        .mounter()
        .unmount(&host.target)
        .expect_err("busy target");

    assert!(matches!(err, MountError::CommandFailed { ref program, .. } if program == "umount"));
    assert!(host.target.exists());
}
