//! Core library for the `flexvol` QingCloud block-storage driver.
//!
//! A node agent runs the binary once per volume operation. Each call
//! drives the [`attacher::AttachDetachOrchestrator`], which delegates
//! provider work to the [`manager::VolumeManager`] and waits on provider
//! jobs with the [`job::JobWaiter`]. The provider itself sits behind the
//! [`storage::BlockStorage`] trait so the QingCloud client can be swapped
//! for the in-memory fake in tests.

pub mod attacher;
pub mod command;
pub mod config;
pub mod job;
pub mod logging;
pub mod manager;
pub mod mount;
pub mod plugin;
pub mod poll;
pub mod qingcloud;
pub mod storage;
pub mod test_support;
pub mod volume;

pub use attacher::{AttachDetachError, AttachDetachOrchestrator, AttachmentReport, VolumeSpec};
pub use config::{ConfigError, FlexVolumeConfig};
pub use job::JobWaiter;
pub use manager::{VolumeError, VolumeManager};
pub use mount::{FsType, MountError, Mounter, SystemMounter};
pub use plugin::{FlexVolumePlugin, Invocation, VolumeResult};
pub use qingcloud::QingCloudStorage;
pub use storage::{BlockStorage, ProviderError, ProviderErrorKind};
pub use volume::{InstanceId, JobId, JobStatus, Volume, VolumeRequest, VolumeType};
