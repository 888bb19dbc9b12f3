//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::future::ready;
use std::rc::Rc;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex, MutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::mount::{FsType, MountError, Mounter};
use crate::storage::{BlockStorage, ProviderError, RET_CODE_RESOURCE_NOT_FOUND, StorageFuture};
use crate::volume::{
    Attachment, CreatedVolume, InstanceId, JobId, JobStatus, Volume, VolumeRequest, VolumeType,
};

const DEVICE_LETTERS: &str = "bcdefghijklmnopqrstuvwxyz";

/// Storage operations that can be counted or made to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StorageOperation {
    /// `describe_volumes`.
    DescribeVolumes,
    /// `create_volumes`.
    CreateVolumes,
    /// `delete_volumes`.
    DeleteVolumes,
    /// `attach_volumes`.
    AttachVolumes,
    /// `detach_volumes`.
    DetachVolumes,
    /// `describe_job`.
    DescribeJob,
}

impl StorageOperation {
    /// Returns `true` for operations that change provider state.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::CreateVolumes | Self::DeleteVolumes | Self::AttachVolumes | Self::DetachVolumes
        )
    }
}

/// Records a single call made through [`MemoryBlockStorage`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StorageCall {
    /// Describe for the listed IDs.
    DescribeVolumes(Vec<String>),
    /// Create with the resolved request.
    CreateVolumes(VolumeRequest),
    /// Delete for the listed IDs.
    DeleteVolumes(Vec<String>),
    /// Attach of the listed IDs to an instance.
    AttachVolumes {
        /// Volumes to attach.
        volume_ids: Vec<String>,
        /// Target instance.
        instance_id: InstanceId,
    },
    /// Detach of the listed IDs from an instance.
    DetachVolumes {
        /// Volumes to detach.
        volume_ids: Vec<String>,
        /// Source instance.
        instance_id: InstanceId,
    },
    /// Job status query.
    DescribeJob(JobId),
}

impl StorageCall {
    /// Operation this call belongs to.
    #[must_use]
    pub const fn operation(&self) -> StorageOperation {
        match self {
            Self::DescribeVolumes(_) => StorageOperation::DescribeVolumes,
            Self::CreateVolumes(_) => StorageOperation::CreateVolumes,
            Self::DeleteVolumes(_) => StorageOperation::DeleteVolumes,
            Self::AttachVolumes { .. } => StorageOperation::AttachVolumes,
            Self::DetachVolumes { .. } => StorageOperation::DetachVolumes,
            Self::DescribeJob(_) => StorageOperation::DescribeJob,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    volumes: BTreeMap<String, Volume>,
    deleted: BTreeSet<String>,
    hidden: BTreeSet<String>,
    rival_attachments: BTreeMap<String, InstanceId>,
    jobs: BTreeMap<JobId, VecDeque<JobStatus>>,
    next_job_script: Option<Vec<JobStatus>>,
    failures: BTreeMap<StorageOperation, VecDeque<ProviderError>>,
    calls: Vec<StorageCall>,
    blank_devices: bool,
    job_counter: u64,
    volume_counter: u64,
    device_counter: usize,
}

impl MemoryState {
    fn record(&mut self, call: StorageCall) -> Result<(), ProviderError> {
        let operation = call.operation();
        self.calls.push(call);
        match self
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn start_job(&mut self) -> JobId {
        self.job_counter += 1;
        let job_id = JobId::from(format!("j-{:08}", self.job_counter));
        let script = self
            .next_job_script
            .take()
            .unwrap_or_else(|| vec![JobStatus::Successful]);
        self.jobs.insert(job_id.clone(), script.into());
        job_id
    }

    fn next_device(&mut self) -> String {
        let index = self.device_counter;
        self.device_counter += 1;
        DEVICE_LETTERS
            .chars()
            .nth(index)
            .map_or_else(|| format!("/dev/vdx{index}"), |letter| format!("/dev/vd{letter}"))
    }

    fn existing(&self, volume_id: &str) -> Result<(), ProviderError> {
        if self.volumes.contains_key(volume_id) {
            return Ok(());
        }
        if self.deleted.contains(volume_id) {
            return Err(ProviderError::api(
                RET_CODE_RESOURCE_NOT_FOUND,
                format!("volume [{volume_id}] has already been deleted"),
            ));
        }
        Err(not_found(volume_id))
    }
}

fn not_found(volume_id: &str) -> ProviderError {
    ProviderError::api(
        RET_CODE_RESOURCE_NOT_FOUND,
        format!("resource [{volume_id}] not found"),
    )
}

/// In-memory [`BlockStorage`] that applies mutations immediately and
/// records every call.
///
/// Jobs succeed on their first poll unless a status sequence is scripted;
/// the last scripted status repeats forever.
#[derive(Clone, Debug, Default)]
pub struct MemoryBlockStorage {
    state: Arc<StdMutex<MemoryState>>,
}

impl MemoryBlockStorage {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Seeds a detached volume.
    pub fn insert_volume(&self, volume_id: &str, capacity_gb: u32) {
        self.with_state(|state| {
            state.volumes.insert(
                volume_id.to_owned(),
                Volume {
                    id: volume_id.to_owned(),
                    name: volume_id.to_owned(),
                    capacity_gb,
                    volume_type: Some(VolumeType::default()),
                    attachment: None,
                },
            );
        });
    }

    /// Seeds a volume already attached to `instance_id` on `device`.
    pub fn insert_attached_volume(&self, volume_id: &str, instance_id: &str, device: &str) {
        self.insert_volume(volume_id, 10);
        self.with_state(|state| {
            if let Some(volume) = state.volumes.get_mut(volume_id) {
                volume.attachment = Some(Attachment {
                    instance_id: InstanceId::from(instance_id),
                    device: device.to_owned(),
                });
            }
        });
    }

    /// Binds `volume_id` to `instance_id` at the start of the next attach
    /// call, as if another caller attached it between the pre-check and
    /// the request.
    pub fn attach_concurrently(&self, volume_id: &str, instance_id: &str) {
        self.with_state(|state| {
            state
                .rival_attachments
                .insert(volume_id.to_owned(), InstanceId::from(instance_id));
        });
    }

    /// Omits `volume_id` from describe results while keeping it mutable,
    /// mimicking a volume that disappears between calls.
    pub fn hide_from_describe(&self, volume_id: &str) {
        self.with_state(|state| {
            state.hidden.insert(volume_id.to_owned());
        });
    }

    /// Returns the current provider view of `volume_id`.
    #[must_use]
    pub fn volume(&self, volume_id: &str) -> Option<Volume> {
        self.with_state(|state| state.volumes.get(volume_id).cloned())
    }

    /// Registers a standalone job following `statuses`.
    pub fn script_job(&self, statuses: impl IntoIterator<Item = JobStatus>) -> JobId {
        self.with_state(|state| {
            state.next_job_script = Some(statuses.into_iter().collect());
            state.start_job()
        })
    }

    /// Makes the job started by the next mutating call follow `statuses`.
    pub fn script_next_job(&self, statuses: impl IntoIterator<Item = JobStatus>) {
        self.with_state(|state| state.next_job_script = Some(statuses.into_iter().collect()));
    }

    /// Makes the next call to `operation` fail with `error`.
    pub fn fail_next(&self, operation: StorageOperation, error: ProviderError) {
        self.with_state(|state| {
            state
                .failures
                .entry(operation)
                .or_default()
                .push_back(error);
        });
    }

    /// Reports attachments without a device path, as the provider does
    /// briefly after an attach job completes.
    pub fn set_blank_devices(&self, blank: bool) {
        self.with_state(|state| state.blank_devices = blank);
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<StorageCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Counts calls to `operation`.
    #[must_use]
    pub fn count(&self, operation: StorageOperation) -> usize {
        self.with_state(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.operation() == operation)
                .count()
        })
    }

    /// Counts calls that change provider state.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        self.with_state(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.operation().is_mutating())
                .count()
        })
    }
}

impl BlockStorage for MemoryBlockStorage {
    fn describe_volumes<'a>(&'a self, volume_ids: &'a [String]) -> StorageFuture<'a, Vec<Volume>> {
        let result = self.with_state(|state| {
            state.record(StorageCall::DescribeVolumes(volume_ids.to_vec()))?;
            let blank = state.blank_devices;
            Ok(volume_ids
                .iter()
                .filter(|id| !state.hidden.contains(*id))
                .filter_map(|id| state.volumes.get(id).cloned())
                .map(|mut volume| {
                    if blank && let Some(attachment) = volume.attachment.as_mut() {
                        attachment.device.clear();
                    }
                    volume
                })
                .collect())
        });
        Box::pin(ready(result))
    }

    fn create_volumes<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> StorageFuture<'a, CreatedVolume> {
        let result = self.with_state(|state| {
            state.record(StorageCall::CreateVolumes(request.clone()))?;
            state.volume_counter += 1;
            let volume_id = format!("vol-{:08}", state.volume_counter);
            state.volumes.insert(
                volume_id.clone(),
                Volume {
                    id: volume_id.clone(),
                    name: request.name.clone(),
                    capacity_gb: request.capacity_gb,
                    volume_type: request.volume_type,
                    attachment: None,
                },
            );
            Ok(CreatedVolume {
                volume_id,
                job_id: state.start_job(),
            })
        });
        Box::pin(ready(result))
    }

    fn delete_volumes<'a>(&'a self, volume_ids: &'a [String]) -> StorageFuture<'a, JobId> {
        let result = self.with_state(|state| {
            state.record(StorageCall::DeleteVolumes(volume_ids.to_vec()))?;
            for id in volume_ids {
                state.existing(id)?;
            }
            for id in volume_ids {
                state.volumes.remove(id);
                state.deleted.insert(id.clone());
            }
            Ok(state.start_job())
        });
        Box::pin(ready(result))
    }

    fn attach_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
        instance_id: &'a InstanceId,
    ) -> StorageFuture<'a, JobId> {
        let result = self.with_state(|state| {
            state.record(StorageCall::AttachVolumes {
                volume_ids: volume_ids.to_vec(),
                instance_id: instance_id.clone(),
            })?;
            for id in volume_ids {
                if let Some(rival) = state.rival_attachments.remove(id) {
                    let device = state.next_device();
                    if let Some(volume) = state.volumes.get_mut(id) {
                        volume.attachment = Some(Attachment {
                            instance_id: rival,
                            device,
                        });
                    }
                }
            }
            for id in volume_ids {
                state.existing(id)?;
                if let Some(attachment) = state.volumes.get(id).and_then(|v| v.attachment.as_ref())
                {
                    return Err(ProviderError::api(
                        1400,
                        format!(
                            "volume [{id}] have been already attached to instance [{}]",
                            attachment.instance_id
                        ),
                    ));
                }
            }
            for id in volume_ids {
                let device = state.next_device();
                if let Some(volume) = state.volumes.get_mut(id) {
                    volume.attachment = Some(Attachment {
                        instance_id: instance_id.clone(),
                        device,
                    });
                }
            }
            Ok(state.start_job())
        });
        Box::pin(ready(result))
    }

    fn detach_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
        instance_id: &'a InstanceId,
    ) -> StorageFuture<'a, JobId> {
        let result = self.with_state(|state| {
            state.record(StorageCall::DetachVolumes {
                volume_ids: volume_ids.to_vec(),
                instance_id: instance_id.clone(),
            })?;
            for id in volume_ids {
                state.existing(id)?;
                let attached = state
                    .volumes
                    .get(id)
                    .is_some_and(|volume| volume.is_attached_to(instance_id));
                if !attached {
                    return Err(ProviderError::api(
                        1400,
                        format!("volume [{id}] is not attached to instance [{instance_id}]"),
                    ));
                }
            }
            for id in volume_ids {
                if let Some(volume) = state.volumes.get_mut(id) {
                    volume.attachment = None;
                }
            }
            Ok(state.start_job())
        });
        Box::pin(ready(result))
    }

    fn describe_job<'a>(&'a self, job_id: &'a JobId) -> StorageFuture<'a, Option<JobStatus>> {
        let result = self.with_state(|state| {
            state.record(StorageCall::DescribeJob(job_id.clone()))?;
            Ok(state.jobs.get_mut(job_id).and_then(|statuses| {
                if statuses.len() > 1 {
                    statuses.pop_front()
                } else {
                    statuses.front().cloned()
                }
            }))
        });
        Box::pin(ready(result))
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns the recorded invocations rendered as command strings.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Mount recorded by [`MemoryMounter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountRecord {
    /// Device that was mounted.
    pub device: String,
    /// Filesystem used.
    pub fs_type: FsType,
    /// Mount options.
    pub options: Vec<String>,
}

/// [`Mounter`] that tracks mounts in memory while creating and removing
/// real directories, so path probes behave as on a host.
#[derive(Clone, Debug, Default)]
pub struct MemoryMounter {
    mounts: Rc<RefCell<BTreeMap<Utf8PathBuf, MountRecord>>>,
    failures: Rc<RefCell<VecDeque<MountError>>>,
    format_calls: Rc<RefCell<usize>>,
}

impl MemoryMounter {
    /// Creates a mounter with nothing mounted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `format_and_mount` fail with `error`.
    pub fn fail_next_mount(&self, error: MountError) {
        self.failures.borrow_mut().push_back(error);
    }

    /// Returns the mount at `target`, if any.
    #[must_use]
    pub fn mount_at(&self, target: &Utf8Path) -> Option<MountRecord> {
        self.mounts.borrow().get(target).cloned()
    }

    /// Number of `format_and_mount` calls, including failed ones.
    #[must_use]
    pub fn format_calls(&self) -> usize {
        *self.format_calls.borrow()
    }
}

impl Mounter for MemoryMounter {
    fn is_likely_not_mount_point(&self, path: &Utf8Path) -> Result<bool, MountError> {
        if !path.exists() {
            return Err(MountError::MissingPath {
                path: path.to_string(),
            });
        }
        Ok(!self.mounts.borrow().contains_key(path))
    }

    fn format_and_mount(
        &self,
        device: &str,
        target: &Utf8Path,
        fs_type: FsType,
        options: &[String],
    ) -> Result<(), MountError> {
        *self.format_calls.borrow_mut() += 1;
        if let Some(err) = self.failures.borrow_mut().pop_front() {
            return Err(err);
        }
        self.mounts.borrow_mut().insert(
            target.to_owned(),
            MountRecord {
                device: device.to_owned(),
                fs_type,
                options: options.to_vec(),
            },
        );
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError> {
        self.mounts.borrow_mut().remove(target);
        if target.exists() {
            fs::remove_dir(target).map_err(|err| MountError::Io {
                action: "remove",
                path: target.to_string(),
                message: err.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `pairs` and removes `unset` while holding the global mutex.
    pub async fn scoped(pairs: &[(&str, &str)], unset: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| key)
                    .chain(unset)
                    .all(|key| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::scoped"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + unset.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in unset {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Sets multiple environment variables while holding the global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::scoped(pairs, &[]).await
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
