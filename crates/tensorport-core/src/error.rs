use std::fmt;

use crate::{Shape, SlotKind};

/// Coarse classification of a [`SessionError`], stable across message changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    LoadFailure,
    ExecutionFailure,
    ReshapeMismatch,
    NotInitialized,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::LoadFailure => "load failure",
            ErrorKind::ExecutionFailure => "execution failure",
            ErrorKind::ReshapeMismatch => "reshape mismatch",
            ErrorKind::NotInitialized => "not initialized",
        };
        f.write_str(s)
    }
}

/// Every way a session operation can fail.
///
/// Backend errors never surface raw: the runtime folds them into
/// `LoadFailure` or `ExecutionFailure` with the backend's message attached.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} `{name}` not found")]
    NotFound { kind: SlotKind, name: String },

    #[error("failed to load model: {message}")]
    LoadFailure { message: String },

    #[error("execution failed: {message}")]
    ExecutionFailure { message: String },

    /// The requested shape needs more bytes than the slot's max tensor holds.
    #[error("shape {requested} for `{name}` needs {required} bytes, {capacity} allocated")]
    ReshapeMismatch {
        name: String,
        requested: Shape,
        required: usize,
        capacity: usize,
    },

    #[error("session is not initialized")]
    NotInitialized,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SessionError::NotFound { .. } => ErrorKind::NotFound,
            SessionError::LoadFailure { .. } => ErrorKind::LoadFailure,
            SessionError::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            SessionError::ReshapeMismatch { .. } => ErrorKind::ReshapeMismatch,
            SessionError::NotInitialized => ErrorKind::NotInitialized,
        }
    }

    /// Unknown slot names are argument errors from the caller's point of view.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidArgument | ErrorKind::NotFound
        )
    }

    pub fn not_found(kind: SlotKind, name: impl Into<String>) -> Self {
        SessionError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn load(err: &anyhow::Error) -> Self {
        SessionError::LoadFailure {
            message: format!("{err:#}"),
        }
    }

    pub fn execution(err: &anyhow::Error) -> Self {
        SessionError::ExecutionFailure {
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
