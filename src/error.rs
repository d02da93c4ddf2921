use thiserror::Error;

use crate::recorder::RecorderState;

/// Errors surfaced by the recorder engine.
///
/// Configuration and state-transition errors are returned synchronously from
/// `configure`/`start`/`stop`. Capture and file-system errors that happen
/// mid-recording terminate the event stream instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Cannot {operation} while recorder is {state}")]
    InvalidState {
        operation: &'static str,
        state: RecorderState,
    },

    #[error("Microphone permission has not been granted")]
    PermissionDenied,

    #[error("Audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio capture failed: {0}")]
    CaptureError(String),

    #[error("File system error: {0}")]
    FileSystemError(String),
}

impl RecorderError {
    pub(crate) fn invalid_state(operation: &'static str, state: RecorderState) -> Self {
        Self::InvalidState { operation, state }
    }

    pub(crate) fn fs(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::FileSystemError(format!("{}: {}", context, err))
    }
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;
