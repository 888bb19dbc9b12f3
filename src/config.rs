//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::job::JobWaiter;
use crate::volume::VolumeType;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "FLEXVOL_CONFIG_PATH";
/// Configuration file searched for by discovery.
pub const CONFIG_FILE_NAME: &str = "flexvol.toml";

/// Provider credentials, endpoint, and timing settings merged from
/// defaults, the discovered `flexvol.toml`, and `FLEXVOL_*` environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FLEXVOL",
    discovery(
        app_name = "flexvol",
        env_var = "FLEXVOL_CONFIG_PATH",
        config_file_name = "flexvol.toml",
        dotfile_name = ".flexvol.toml",
        project_file_name = "flexvol.toml"
    )
)]
pub struct FlexVolumeConfig {
    /// API access key identifier. Required.
    #[ortho_config(default = String::new())]
    pub access_key_id: String,
    /// API secret used to sign requests. Required.
    #[ortho_config(default = String::new())]
    pub secret_access_key: String,
    /// Zone that owns the volumes and instances (for example `pek3a`).
    /// Required.
    #[ortho_config(default = String::new())]
    pub zone: String,
    /// API host.
    #[ortho_config(default = "api.qingcloud.com".to_owned())]
    pub host: String,
    /// API port.
    #[ortho_config(default = 443)]
    pub port: u16,
    /// URL scheme, `https` or `http`.
    #[ortho_config(default = "https".to_owned())]
    pub protocol: String,
    /// API path prefix.
    #[ortho_config(default = "/iaas".to_owned())]
    pub uri: String,
    /// Volume type for create requests that do not name one: a provider
    /// code (`0`, `2`, `3`) or a name such as `high-capacity`.
    pub default_volume_type: Option<String>,
    /// Upper bound on waiting for a provider job.
    #[ortho_config(default = 180)]
    pub job_timeout_secs: u64,
    /// Interval between job status polls.
    #[ortho_config(default = 3)]
    pub job_poll_interval_secs: u64,
    /// Upper bound on waiting for an attached device to appear.
    #[ortho_config(default = 60)]
    pub attach_timeout_secs: u64,
    /// Interval between local device path probes.
    #[ortho_config(default = 1000)]
    pub device_poll_interval_ms: u64,
    /// `tracing` filter directive; logs are off unless set.
    #[ortho_config(default = "off".to_owned())]
    pub log_filter: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 3] = [
    FieldMetadata::new("API access key ID", "FLEXVOL_ACCESS_KEY_ID", "access_key_id"),
    FieldMetadata::new(
        "API secret access key",
        "FLEXVOL_SECRET_ACCESS_KEY",
        "secret_access_key",
    ),
    FieldMetadata::new("zone", "FLEXVOL_ZONE", "zone"),
];

impl FlexVolumeConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments; the argv of a
    /// driver call is fixed by the node agent. Values merge defaults,
    /// configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("flexvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply a missing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] for an unusable protocol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [&self.access_key_id, &self.secret_access_key, &self.zone];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            Self::require_field(value, metadata)?;
        }
        if !matches!(self.protocol.as_str(), "https" | "http") {
            return Err(ConfigError::Invalid(format!(
                "protocol must be https or http, got '{}'",
                self.protocol
            )));
        }
        Ok(())
    }

    /// Resolves the default volume type once for the invocation.
    ///
    /// An unset or unrecognised value falls back to
    /// [`VolumeType::HighPerformance`].
    #[must_use]
    pub fn resolve_default_volume_type(&self) -> VolumeType {
        let Some(raw) = self.default_volume_type.as_deref() else {
            return VolumeType::default();
        };
        raw.parse().unwrap_or_else(|err| {
            warn!(error = %err, "ignoring configured default volume type");
            VolumeType::default()
        })
    }

    /// Base URL of the API, ending in `/`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.protocol,
            self.host,
            self.port,
            self.request_path()
        )
    }

    /// Path component signed into every request, ending in `/`.
    #[must_use]
    pub fn request_path(&self) -> String {
        format!("/{}/", self.uri.trim_matches('/'))
    }

    /// Job waiter configured with the job timeout and poll interval.
    #[must_use]
    pub const fn job_waiter(&self) -> JobWaiter {
        JobWaiter::new(
            Duration::from_secs(self.job_timeout_secs),
            Duration::from_secs(self.job_poll_interval_secs),
        )
    }

    /// Deadline for a device path to appear after attach.
    #[must_use]
    pub const fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }

    /// Interval between device path probes.
    #[must_use]
    pub const fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_poll_interval_ms)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
