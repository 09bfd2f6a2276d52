//! Error taxonomy shared by the exec backends, the shell and the filesystem
//! bridge.
//!
//! The set is closed: backends translate their transport errors into one of
//! these kinds before anything reaches a caller, so call sites match on the
//! variant instead of downcasting.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Which way an archive was travelling when a transfer failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransferDirection {
    HostToContainer,
    ContainerToHost,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::HostToContainer => write!(f, "host -> container"),
            TransferDirection::ContainerToHost => write!(f, "container -> host"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DockhandError {
    /// A checked command finished with a non-zero exit code.
    #[error("command '{command}' exited with code {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// A command (or a wait on it) outlived its deadline. Carries whatever
    /// output had been collected when the deadline hit.
    #[error("command '{command}' timed out after {:.3}s", elapsed.as_secs_f64())]
    TimedOut {
        command: String,
        elapsed: Duration,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("no such file or directory in container: {path}")]
    ContainerFileNotFound { path: String },

    #[error("permission denied: cannot {operation} {path}")]
    PermissionDenied { path: String, operation: String },

    #[error("archive transfer failed ({direction}): {reason}")]
    ArchiveTransferFailed {
        direction: TransferDirection,
        reason: String,
    },

    #[error("failed to send signal {signal} to process {pid}: {reason}")]
    ProcessSignalFailed { pid: u32, signal: i32, reason: String },

    /// The backend could not create, start or inspect an exec session.
    #[error("exec session error: {0}")]
    Exec(String),

    /// Output could not be decoded with the requested encoding.
    #[error("failed to decode output as {encoding}: {reason}")]
    Decode { encoding: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl DockhandError {
    /// Partial or complete stdout attached to the error, if any.
    pub fn stdout(&self) -> Option<&[u8]> {
        match self {
            DockhandError::NonZeroExit { stdout, .. } | DockhandError::TimedOut { stdout, .. } => {
                Some(stdout)
            }
            _ => None,
        }
    }

    /// Partial or complete stderr attached to the error, if any.
    pub fn stderr(&self) -> Option<&[u8]> {
        match self {
            DockhandError::NonZeroExit { stderr, .. } | DockhandError::TimedOut { stderr, .. } => {
                Some(stderr)
            }
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DockhandError::ContainerFileNotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DockhandError::TimedOut { .. })
    }

    pub fn transfer(direction: TransferDirection, reason: impl fmt::Display) -> Self {
        DockhandError::ArchiveTransferFailed {
            direction,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an upload failure.
    pub fn upload(reason: impl fmt::Display) -> Self {
        Self::transfer(TransferDirection::HostToContainer, reason)
    }

    /// Shorthand for a download failure.
    pub fn download(reason: impl fmt::Display) -> Self {
        Self::transfer(TransferDirection::ContainerToHost, reason)
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        DockhandError::ContainerFileNotFound { path: path.into() }
    }
}

pub type DockhandResult<T> = Result<T, DockhandError>;
