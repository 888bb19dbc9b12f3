//! The JSON result envelope printed for every driver call.

use serde::Serialize;

const ENCODE_FAILURE: &str = r#"{"status":"Failure","message":"failed to encode driver result"}"#;

/// Outcome reported to the node agent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Status {
    /// The call succeeded.
    Success,
    /// The call failed; `message` explains why.
    Failure,
    /// The verb is not implemented by this driver.
    #[serde(rename = "Not supported")]
    NotSupported,
}

/// Driver capabilities advertised by `init`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Capabilities {
    /// Whether the driver implements attach and detach.
    pub attach: bool,
}

/// Result envelope. Optional fields are omitted when unset.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeResult {
    /// Call outcome.
    pub status: Status,
    /// Human-readable detail, set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Device path reported by `attach` and `waitforattach`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Unique volume name reported by `getvolumename`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    /// Attachment state reported by `isattached`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached: Option<bool>,
    /// Capabilities reported by `init`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl VolumeResult {
    const fn with_status(status: Status) -> Self {
        Self {
            status,
            message: None,
            device: None,
            volume_name: None,
            attached: None,
            capabilities: None,
        }
    }

    /// A bare success.
    #[must_use]
    pub const fn success() -> Self {
        Self::with_status(Status::Success)
    }

    /// A failure carrying `message`.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::with_status(Status::Failure)
        }
    }

    /// The reply for verbs this driver does not implement.
    #[must_use]
    pub fn not_supported(verb: &str) -> Self {
        Self {
            message: Some(format!("{verb} is not supported")),
            ..Self::with_status(Status::NotSupported)
        }
    }

    /// The `init` reply advertising attach support.
    #[must_use]
    pub const fn init() -> Self {
        Self {
            status: Status::Success,
            message: None,
            device: None,
            volume_name: None,
            attached: None,
            capabilities: Some(Capabilities { attach: true }),
        }
    }

    /// Sets the device path.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Sets the volume name.
    #[must_use]
    pub fn with_volume_name(mut self, volume_name: impl Into<String>) -> Self {
        self.volume_name = Some(volume_name.into());
        self
    }

    /// Sets the attachment state.
    #[must_use]
    pub const fn with_attached(mut self, attached: bool) -> Self {
        self.attached = Some(attached);
        self
    }

    /// Serialises the envelope on one line.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| ENCODE_FAILURE.to_owned())
    }

    /// Process exit code: `0` for success, `1` otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.status {
            Status::Success => 0,
            Status::Failure | Status::NotSupported => 1,
        }
    }
}
