//! Error taxonomy shared by the shell, the engine and the service layer.

use std::fmt;

use thiserror::Error;

/// Failure modes of a single privileged command execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    /// The elevated session could not be obtained (denied or no su binary).
    #[error("root access denied: {0}")]
    AccessDenied(String),

    /// Talking to the elevated session failed.
    #[error("privileged shell I/O failure: {0}")]
    Io(String),

    /// The command did not report completion within the poll budget.
    /// It may still be running on the device.
    #[error("command `{command}` did not finish after {attempts} polls")]
    Timeout { command: String, attempts: u32 },
}

/// Coarse classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AccessDenied,
    PathNotFound,
    AlreadyExists,
    CommandFailed,
    Timeout,
    IoFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::PathNotFound => "path not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::CommandFailed => "command failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::IoFailure => "I/O failure",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a relocation operation: a kind plus the message shown
/// to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RelocationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RelocationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, message)
    }

    pub fn path_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PathNotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandFailed, message)
    }
}

impl From<ShellError> for RelocationError {
    fn from(err: ShellError) -> Self {
        let kind = match &err {
            ShellError::AccessDenied(_) => ErrorKind::AccessDenied,
            ShellError::Io(_) => ErrorKind::IoFailure,
            ShellError::Timeout { .. } => ErrorKind::Timeout,
        };
        Self::new(kind, err.to_string())
    }
}

/// Outcome of every top-level operation.
pub type RelocationResult = Result<(), RelocationError>;
