//! Unit tests for the attach/detach orchestrator.

use std::fs as std_fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::job::JobWaiter;
use crate::storage::ProviderError;
use crate::test_support::{MemoryBlockStorage, MemoryMounter, StorageOperation};
use crate::volume::VolumeType;

const NODE: &str = "i-node-a";

type Orchestrator = AttachDetachOrchestrator<MemoryBlockStorage, MemoryMounter>;

#[fixture]
fn orchestrator() -> Orchestrator {
    let manager = VolumeManager::new(
        MemoryBlockStorage::new(),
        JobWaiter::new(Duration::from_secs(30), Duration::from_millis(10)),
        VolumeType::default(),
    );
    AttachDetachOrchestrator::new(manager, MemoryMounter::new(), Duration::from_millis(10))
}

#[fixture]
fn scratch() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    (dir, root)
}

fn storage(orchestrator: &Orchestrator) -> &MemoryBlockStorage {
    orchestrator.manager().storage()
}

#[rstest]
#[tokio::test]
async fn attach_returns_provider_device(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_volume("vol-1", 10);

    let device = orchestrator
        .attach(&VolumeSpec::new("vol-1"), NODE)
        .await
        .expect("attach");

    assert_eq!(device, "/dev/vdb");
}

#[rstest]
#[tokio::test]
async fn attach_race_won_by_this_node_returns_its_device(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_volume("vol-1", 10);
    storage(&orchestrator).attach_concurrently("vol-1", NODE);

    let device = orchestrator
        .attach(&VolumeSpec::new("vol-1"), NODE)
        .await
        .expect("race is tolerated");

    assert_eq!(device, "/dev/vdb");
    assert_eq!(storage(&orchestrator).count(StorageOperation::AttachVolumes), 1);
}

#[rstest]
#[tokio::test]
async fn attach_race_won_by_another_instance_fails(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_volume("vol-1", 10);
    storage(&orchestrator).attach_concurrently("vol-1", "i-other");

    let err = orchestrator
        .attach(&VolumeSpec::new("vol-1"), NODE)
        .await
        .expect_err("volume belongs to another instance");

    let AttachDetachError::Volume(VolumeError::Provider(provider)) = &err else {
        panic!("expected provider error, got {err:?}");
    };
    assert_eq!(provider.kind(), ProviderErrorKind::AlreadyAttached);
    assert!(err.to_string().contains("i-other"), "{err}");
    let volume = storage(&orchestrator).volume("vol-1").expect("volume");
    assert!(volume.is_attached_to(&InstanceId::from("i-other")));
}

#[rstest]
#[tokio::test]
async fn attach_rejection_for_unattached_volume_is_not_success(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_volume("vol-1", 10);
    storage(&orchestrator).fail_next(
        StorageOperation::AttachVolumes,
        ProviderError::api(
            1400,
            "volume [vol-1] have been already attached to instance [i-node-a]",
        ),
    );

    let err = orchestrator
        .attach(&VolumeSpec::new("vol-1"), NODE)
        .await
        .expect_err("describe shows no binding");

    assert!(matches!(
        err,
        AttachDetachError::Volume(VolumeError::Provider(_))
    ));
}

#[rstest]
#[tokio::test]
async fn attach_propagates_other_provider_errors(orchestrator: Orchestrator) {
    let err = orchestrator
        .attach(&VolumeSpec::new("vol-404"), NODE)
        .await
        .expect_err("volume is unknown");

    assert!(matches!(err, AttachDetachError::Volume(VolumeError::Provider(_))));
}

#[rstest]
#[tokio::test]
async fn wait_for_attach_rejects_empty_path(orchestrator: Orchestrator) {
    let err = orchestrator
        .wait_for_attach("  ", Duration::from_secs(1))
        .await
        .expect_err("empty path");

    assert!(matches!(err, AttachDetachError::Precondition(_)));
}

#[rstest]
#[tokio::test]
async fn wait_for_attach_returns_present_device(
    orchestrator: Orchestrator,
    scratch: (TempDir, Utf8PathBuf),
) {
    let (_dir, root) = scratch;
    let device = root.join("vdb");
    std_fs::write(&device, b"").expect("create device stand-in");

    let found = orchestrator
        .wait_for_attach(device.as_str(), Duration::from_secs(5))
        .await
        .expect("device exists");

    assert_eq!(found, device.as_str());
}

#[rstest]
#[tokio::test]
async fn wait_for_attach_times_out_for_absent_device(
    orchestrator: Orchestrator,
    scratch: (TempDir, Utf8PathBuf),
) {
    let (_dir, root) = scratch;
    let device = root.join("vdz");

    let err = orchestrator
        .wait_for_attach(device.as_str(), Duration::from_millis(100))
        .await
        .expect_err("device never appears");

    assert!(matches!(err, AttachDetachError::Timeout { action: "attach", .. }));
}

#[rstest]
#[tokio::test]
async fn wait_for_detach_completes_when_device_absent(
    orchestrator: Orchestrator,
    scratch: (TempDir, Utf8PathBuf),
) {
    let (_dir, root) = scratch;

    orchestrator
        .wait_for_detach(root.join("vdb").as_str(), Duration::from_secs(5))
        .await
        .expect("device is gone");
}

#[rstest]
#[tokio::test]
async fn wait_for_detach_times_out_while_device_present(
    orchestrator: Orchestrator,
    scratch: (TempDir, Utf8PathBuf),
) {
    let (_dir, root) = scratch;
    let device = root.join("vdb");
    std_fs::write(&device, b"").expect("create device stand-in");

    let err = orchestrator
        .wait_for_detach(device.as_str(), Duration::from_millis(100))
        .await
        .expect_err("device stays");

    assert!(matches!(err, AttachDetachError::Timeout { action: "detach", .. }));
}

#[rstest]
#[tokio::test]
async fn volumes_are_attached_maps_each_spec(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_attached_volume("vol-1", NODE, "/dev/vdb");
    storage(&orchestrator).insert_volume("vol-2", 10);
    let specs = [VolumeSpec::new("vol-1"), VolumeSpec::new("vol-2")];

    let report = orchestrator.volumes_are_attached(&specs, NODE).await;

    assert_eq!(report.error, None);
    assert_eq!(report.attached.get("vol-1"), Some(&true));
    assert_eq!(report.attached.get("vol-2"), Some(&false));
}

#[rstest]
#[tokio::test]
async fn volumes_are_attached_fails_safe_on_provider_error(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_volume("vol-2", 10);
    storage(&orchestrator).fail_next(
        StorageOperation::DescribeVolumes,
        ProviderError::transport("timeout"),
    );
    let specs = [VolumeSpec::new("vol-1"), VolumeSpec::new("vol-2")];

    let report = orchestrator.volumes_are_attached(&specs, NODE).await;

    assert!(report.attached.values().all(|attached| *attached));
    assert_eq!(report.attached.len(), 2);
    assert_eq!(
        report.error,
        Some(VolumeError::Provider(ProviderError::transport("timeout")))
    );
}

#[rstest]
#[tokio::test]
async fn is_attached_reports_attachment_to_this_node(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_attached_volume("vol-1", NODE, "/dev/vdb");
    storage(&orchestrator).insert_attached_volume("vol-2", "i-other", "/dev/vdc");

    let here = orchestrator
        .is_attached(&VolumeSpec::new("vol-1"), NODE)
        .await
        .expect("query");
    let elsewhere = orchestrator
        .is_attached(&VolumeSpec::new("vol-2"), NODE)
        .await
        .expect("query");
    let unknown = orchestrator
        .is_attached(&VolumeSpec::new("vol-404"), NODE)
        .await
        .expect("unknown volumes are not attached");

    assert!(here);
    assert!(!elsewhere);
    assert!(!unknown);
}

#[rstest]
#[tokio::test]
async fn detach_short_circuits_when_not_attached(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_volume("vol-1", 10);

    orchestrator
        .detach("/var/lib/kubelet/plugins/mounts/vol-1", NODE)
        .await
        .expect("detach");

    assert_eq!(storage(&orchestrator).count(StorageOperation::DetachVolumes), 0);
}

#[rstest]
#[tokio::test]
async fn detach_uses_last_path_component(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_attached_volume("vol-1", NODE, "/dev/vdb");

    orchestrator
        .detach("/mnt/vol-1", NODE)
        .await
        .expect("detach");

    assert_eq!(storage(&orchestrator).count(StorageOperation::DetachVolumes), 1);
    assert!(
        storage(&orchestrator)
            .volume("vol-1")
            .is_some_and(|volume| volume.attachment.is_none())
    );
}

#[rstest]
#[tokio::test]
async fn detach_proceeds_when_check_fails(orchestrator: Orchestrator) {
    storage(&orchestrator).insert_attached_volume("vol-1", NODE, "/dev/vdb");
    storage(&orchestrator).fail_next(
        StorageOperation::DescribeVolumes,
        ProviderError::transport("connection reset"),
    );

    orchestrator
        .detach("/mnt/vol-1", NODE)
        .await
        .expect("detach still runs");

    assert_eq!(storage(&orchestrator).count(StorageOperation::DetachVolumes), 1);
}

#[rstest]
#[tokio::test]
async fn detach_rejects_path_without_volume(orchestrator: Orchestrator) {
    let err = orchestrator
        .detach("/", NODE)
        .await
        .expect_err("no final component");

    assert!(matches!(err, AttachDetachError::Precondition(_)));
    assert!(storage(&orchestrator).calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn mount_device_creates_directory_and_mounts_read_only(
    orchestrator: Orchestrator,
    scratch: (TempDir, Utf8PathBuf),
) {
    let (_dir, root) = scratch;
    let target = root.join("mounts").join("vol-1");
    let spec = VolumeSpec {
        volume_id: String::from("vol-1"),
        fs_type: FsType::Xfs,
        read_only: true,
    };

    orchestrator
        .mount_device(&spec, "/dev/vdb", &target)
        .await
        .expect("mount");

    assert!(target.is_dir());
    let record = orchestrator.mounter().mount_at(&target).expect("mounted");
    assert_eq!(record.device, "/dev/vdb");
    assert_eq!(record.fs_type, FsType::Xfs);
    assert_eq!(record.options, vec![String::from(READ_ONLY_OPTION)]);
}

#[rstest]
#[tokio::test]
async fn mount_device_is_idempotent(orchestrator: Orchestrator, scratch: (TempDir, Utf8PathBuf)) {
    let (_dir, root) = scratch;
    let target = root.join("vol-1");
    let spec = VolumeSpec::new("vol-1");

    orchestrator
        .mount_device(&spec, "/dev/vdb", &target)
        .await
        .expect("first mount");
    orchestrator
        .mount_device(&spec, "/dev/vdb", &target)
        .await
        .expect("second mount");

    assert_eq!(orchestrator.mounter().format_calls(), 1);
}

#[rstest]
#[tokio::test]
async fn mount_failure_removes_mount_directory(
    orchestrator: Orchestrator,
    scratch: (TempDir, Utf8PathBuf),
) {
    let (_dir, root) = scratch;
    let target = root.join("vol-1");
    orchestrator
        .mounter()
        .fail_next_mount(MountError::CommandFailed {
            program: String::from("mount"),
            message: String::from("wrong fs type"),
        });

    let err = orchestrator
        .mount_device(&VolumeSpec::new("vol-1"), "/dev/vdb", &target)
        .await
        .expect_err("mount fails");

    assert!(matches!(err, AttachDetachError::Mount(MountError::CommandFailed { .. })));
    assert!(!target.exists());
}

#[rstest]
#[tokio::test]
async fn unmount_device_removes_directory(
    orchestrator: Orchestrator,
    scratch: (TempDir, Utf8PathBuf),
) {
    let (_dir, root) = scratch;
    let target = root.join("vol-1");
    orchestrator
        .mount_device(&VolumeSpec::new("vol-1"), "/dev/vdb", &target)
        .await
        .expect("mount");

    orchestrator.unmount_device(&target).expect("unmount");

    assert!(orchestrator.mounter().mount_at(&target).is_none());
    assert!(!target.exists());
}
