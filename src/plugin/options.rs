//! Decoding of the JSON options passed by the node agent.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::attacher::VolumeSpec;
use crate::mount::FsType;

const READ_ONLY_ACCESS: &str = "ro";

/// Errors raised while decoding driver options.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OptionsError {
    /// Raised when the options are not a JSON object; carries the raw
    /// input.
    #[error("Invalid json options: {0}")]
    Json(String),
    /// Raised when a recognised key carries an unusable value.
    #[error("invalid value '{value}' for option {key}")]
    InvalidValue {
        /// Option key as supplied.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Raised when the options do not name a volume.
    #[error("volumeID is required in options")]
    MissingVolumeId,
}

/// Options recognised by the driver. Keys are matched case-insensitively
/// and values may be JSON strings, numbers, or booleans.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeOptions {
    /// `volumeID`.
    pub volume_id: Option<String>,
    /// `kubernetes.io/fsType` or `fsType`.
    pub fs_type: Option<String>,
    /// `kubernetes.io/readwrite` set to `ro`, or `readOnly` set to true.
    pub read_only: bool,
}

impl VolumeOptions {
    /// Decodes `raw`, ignoring keys the driver does not use.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Json`] for malformed JSON or a non-object
    /// document and [`OptionsError::InvalidValue`] for unusable values.
    pub fn from_json(raw: &str) -> Result<Self, OptionsError> {
        let map: Map<String, Value> = serde_json::from_str(raw).map_err(|err| {
            debug!(error = %err, "rejecting driver options");
            OptionsError::Json(raw.to_owned())
        })?;
        let mut options = Self::default();
        for (key, value) in &map {
            let Some(text) = scalar(value) else {
                continue;
            };
            match key.to_ascii_lowercase().as_str() {
                "volumeid" => options.volume_id = non_empty(&text),
                "kubernetes.io/fstype" | "fstype" => options.fs_type = non_empty(&text),
                "kubernetes.io/readwrite" => {
                    options.read_only |= text.eq_ignore_ascii_case(READ_ONLY_ACCESS);
                }
                "readonly" => options.read_only |= parse_bool(key, &text)?,
                _ => {}
            }
        }
        Ok(options)
    }

    /// Volume ID named by the options.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::MissingVolumeId`] when absent.
    pub fn volume_id(&self) -> Result<&str, OptionsError> {
        self.volume_id
            .as_deref()
            .ok_or(OptionsError::MissingVolumeId)
    }

    /// Builds the per-call volume spec.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] when the volume ID is missing or the
    /// filesystem type is unsupported.
    pub fn to_spec(&self) -> Result<VolumeSpec, OptionsError> {
        let fs_type = self
            .fs_type
            .as_deref()
            .map_or(Ok(FsType::default()), |raw| {
                raw.parse::<FsType>().map_err(|_| invalid("fsType", raw))
            })?;
        Ok(VolumeSpec {
            volume_id: self.volume_id()?.to_owned(),
            fs_type,
            read_only: self.read_only,
        })
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn parse_bool(key: &str, text: &str) -> Result<bool, OptionsError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(invalid(key, text)),
    }
}

fn invalid(key: &str, value: &str) -> OptionsError {
    OptionsError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}
