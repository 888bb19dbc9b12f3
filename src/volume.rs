//! Volume, job, and attachment types shared by the storage layer.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use thiserror::Error;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(String);

        impl $name {
            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Provider identifier of a compute instance.
    InstanceId
);
newtype!(
    /// Handle of an asynchronous provider job.
    JobId
);

/// Performance class of a block volume.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum VolumeType {
    /// High performance volume (provider code `0`).
    #[default]
    HighPerformance,
    /// High capacity volume (provider code `2`).
    HighCapacity,
    /// Super high performance volume (provider code `3`).
    SuperHighPerformance,
}

impl VolumeType {
    /// Every volume type accepted by the provider.
    pub const ALL: [Self; 3] = [
        Self::HighPerformance,
        Self::HighCapacity,
        Self::SuperHighPerformance,
    ];

    /// Returns the numeric code used on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::HighPerformance => 0,
            Self::HighCapacity => 2,
            Self::SuperHighPerformance => 3,
        }
    }

    /// Maps a wire code back to a volume type.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::HighPerformance),
            2 => Some(Self::HighCapacity),
            3 => Some(Self::SuperHighPerformance),
            _ => None,
        }
    }

    /// Returns the canonical kebab-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::HighPerformance => "high-performance",
            Self::HighCapacity => "high-capacity",
            Self::SuperHighPerformance => "super-high-performance",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Raised when a value does not name a supported volume type.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unsupported volume type '{0}': expected one of 0, 2, 3")]
pub struct InvalidVolumeType(pub String);

impl TryFrom<i64> for VolumeType {
    type Error = InvalidVolumeType;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_code(value).ok_or_else(|| InvalidVolumeType(value.to_string()))
    }
}

impl FromStr for VolumeType {
    type Err = InvalidVolumeType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if let Ok(code) = value.parse::<i64>() {
            return Self::try_from(code);
        }
        match value.to_ascii_lowercase().as_str() {
            "high-performance" | "hp" => Ok(Self::HighPerformance),
            "high-capacity" | "hc" => Ok(Self::HighCapacity),
            "super-high-performance" | "shp" => Ok(Self::SuperHighPerformance),
            _ => Err(InvalidVolumeType(value.to_owned())),
        }
    }
}

/// Parameters required to create a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRequest {
    /// Human-friendly volume name. Empty names are replaced by the manager.
    pub name: String,
    /// Requested capacity in gigabytes.
    pub capacity_gb: u32,
    /// Performance class; the manager's default applies when absent.
    pub volume_type: Option<VolumeType>,
}

impl VolumeRequest {
    /// Creates a new request, trimming the name.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity_gb: u32) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            capacity_gb,
            volume_type: None,
        }
    }

    /// Sets an explicit volume type.
    #[must_use]
    pub const fn volume_type(mut self, value: Option<VolumeType>) -> Self {
        self.volume_type = value;
        self
    }
}

/// Binding between a volume and the instance it is attached to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attachment {
    /// Instance holding the volume.
    pub instance_id: InstanceId,
    /// Block device assigned on the instance; may lag behind job completion.
    pub device: String,
}

/// Provider view of a volume at the time of the last describe call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider identifier.
    pub id: String,
    /// Volume name.
    pub name: String,
    /// Capacity in gigabytes.
    pub capacity_gb: u32,
    /// Performance class when the provider reports a known one.
    pub volume_type: Option<VolumeType>,
    /// Current attachment, if any.
    pub attachment: Option<Attachment>,
}

impl Volume {
    /// Returns `true` when the volume is bound to `instance_id`.
    #[must_use]
    pub fn is_attached_to(&self, instance_id: &InstanceId) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|attachment| &attachment.instance_id == instance_id)
    }

    /// Returns the assigned device path, ignoring blank values.
    #[must_use]
    pub fn device(&self) -> Option<&str> {
        self.attachment
            .as_ref()
            .map(|attachment| attachment.device.trim())
            .filter(|device| !device.is_empty())
    }
}

/// Result of a create call: the volume ID is known before the job finishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedVolume {
    /// Identifier of the new volume.
    pub volume_id: String,
    /// Job tracking provisioning.
    pub job_id: JobId,
}

/// Status of an asynchronous provider job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// Accepted or still running.
    Pending,
    /// Finished successfully.
    Successful,
    /// Finished with a failure; carries the status the provider reported.
    Failed(String),
}

impl JobStatus {
    /// Returns `true` for success and failure.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}
