//! Flex-volume driver calls: argument checks, execution against the
//! orchestrator, and the result envelope.

mod invocation;
mod options;
mod result;

use std::time::Duration;

use tracing::{info, warn};

use crate::attacher::{AttachDetachError, AttachDetachOrchestrator};
use crate::command::ProcessCommandRunner;
use crate::config::{ConfigError, FlexVolumeConfig};
use crate::logging;
use crate::manager::VolumeManager;
use crate::mount::{Mounter, SystemMounter};
use crate::qingcloud::QingCloudStorage;
use crate::storage::BlockStorage;

pub use invocation::{DriverRequest, Invocation, InvocationError, Prepared, VERBS};
pub use options::{OptionsError, VolumeOptions};
pub use result::{Capabilities, Status, VolumeResult};

/// Plugin wired to the QingCloud API and the host's mount tools.
pub type SystemPlugin = FlexVolumePlugin<QingCloudStorage, SystemMounter<ProcessCommandRunner>>;

/// Executes validated driver calls.
#[derive(Clone, Debug)]
pub struct FlexVolumePlugin<S, M> {
    orchestrator: AttachDetachOrchestrator<S, M>,
    attach_timeout: Duration,
}

impl SystemPlugin {
    /// Builds the production plugin from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn from_config(config: &FlexVolumeConfig) -> Result<Self, ConfigError> {
        let storage = QingCloudStorage::new(config)?;
        let manager = VolumeManager::new(
            storage,
            config.job_waiter(),
            config.resolve_default_volume_type(),
        );
        let orchestrator = AttachDetachOrchestrator::new(
            manager,
            SystemMounter::new(ProcessCommandRunner),
            config.device_poll_interval(),
        );
        Ok(Self::new(orchestrator, config.attach_timeout()))
    }

    /// Loads configuration, starts logging, and builds the plugin.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = FlexVolumeConfig::load_without_cli_args()?;
        logging::init(&config.log_filter);
        Self::from_config(&config)
    }
}

impl<S, M> FlexVolumePlugin<S, M>
where
    S: BlockStorage,
    M: Mounter,
{
    /// Wraps an orchestrator; `waitforattach` gives up after
    /// `attach_timeout`.
    #[must_use]
    pub const fn new(orchestrator: AttachDetachOrchestrator<S, M>, attach_timeout: Duration) -> Self {
        Self {
            orchestrator,
            attach_timeout,
        }
    }

    /// Borrow the orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &AttachDetachOrchestrator<S, M> {
        &self.orchestrator
    }

    /// Runs `request` and renders the outcome as an envelope.
    pub async fn execute(&self, request: DriverRequest) -> VolumeResult {
        let verb = request.verb();
        match self.dispatch(request).await {
            Ok(result) => {
                info!(verb, "driver call succeeded");
                result
            }
            Err(err) => {
                warn!(verb, error = %err, "driver call failed");
                VolumeResult::failure(err.to_string())
            }
        }
    }

    async fn dispatch(&self, request: DriverRequest) -> Result<VolumeResult, AttachDetachError> {
        let result = match request {
            DriverRequest::Attach { spec, node } => {
                let device = self.orchestrator.attach(&spec, &node).await?;
                if device.is_empty() {
                    VolumeResult::success()
                } else {
                    VolumeResult::success().with_device(device)
                }
            }
            DriverRequest::Detach { device, node } => {
                self.orchestrator.detach(&device, &node).await?;
                VolumeResult::success()
            }
            DriverRequest::MountDevice {
                spec,
                device,
                mount_path,
            } => {
                self.orchestrator
                    .mount_device(&spec, &device, &mount_path)
                    .await?;
                VolumeResult::success()
            }
            DriverRequest::UnmountDevice { mount_path } => {
                self.orchestrator.unmount_device(&mount_path)?;
                VolumeResult::success()
            }
            DriverRequest::WaitForAttach { device } => {
                let found = self
                    .orchestrator
                    .wait_for_attach(&device, self.attach_timeout)
                    .await?;
                VolumeResult::success().with_device(found)
            }
            DriverRequest::IsAttached { spec, node } => {
                let attached = self.orchestrator.is_attached(&spec, &node).await?;
                VolumeResult::success().with_attached(attached)
            }
        };
        Ok(result)
    }
}

/// Answers `invocation`, calling `load` only when the call needs the
/// provider or the host. Malformed arguments never reach `load`.
pub async fn run_with<S, M, F>(invocation: Invocation, load: F) -> VolumeResult
where
    S: BlockStorage,
    M: Mounter,
    F: FnOnce() -> Result<FlexVolumePlugin<S, M>, ConfigError>,
{
    let request = match invocation.prepare() {
        Prepared::Done(result) => return result,
        Prepared::Call(request) => request,
    };
    let plugin = match load() {
        Ok(plugin) => plugin,
        Err(err) => {
            warn!(error = %err, "failed to initialise driver");
            return VolumeResult::failure(format!("Error init FlexVolumePlugin: {err}"));
        }
    };
    plugin.execute(request).await
}

/// Answers `invocation` with the production plugin.
pub async fn run(invocation: Invocation) -> VolumeResult {
    run_with(invocation, SystemPlugin::load).await
}
