//! Error types for local mount primitives.

use thiserror::Error;

use crate::command::CommandError;

/// Errors raised while inspecting, formatting, or mounting local paths.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// Raised when a mount path does not exist yet.
    #[error("mount path {path} does not exist")]
    MissingPath {
        /// Path that was inspected.
        path: String,
    },
    /// Raised when a filesystem call fails.
    #[error("{action} {path}: {message}")]
    Io {
        /// Operation that failed.
        action: &'static str,
        /// Path involved in the operation.
        path: String,
        /// Underlying I/O error text.
        message: String,
    },
    /// Raised when a tool cannot be started.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when a tool exits unsuccessfully.
    #[error("{program} failed: {message}")]
    CommandFailed {
        /// Program that failed.
        program: String,
        /// Diagnostic output from the program.
        message: String,
    },
    /// Raised when the requested filesystem is not supported.
    #[error("unsupported filesystem type '{fs_type}': expected ext4, ext3 or xfs")]
    UnsupportedFsType {
        /// Requested filesystem type.
        fs_type: String,
    },
}
