//! Camera error types

use observatory_indi::IndiError;
use thiserror::Error;

/// Errors raised by camera control and the autofocus engine
#[derive(Debug, Error)]
pub enum CameraError {
    /// A previous command from the same runner has not been collected yet
    #[error("Command already running: {0}")]
    CommandAlreadyRunning(String),

    /// Operation needs the camera in another connection state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed command or non-zero exit of the camera tool
    #[error("Invalid command '{command}': {message}")]
    InvalidCommand { command: String, message: String },

    /// The hardware misbehaved or the tool could not be run
    #[error("Hardware error: {0}")]
    HardwareError(String),

    #[error(transparent)]
    Indi(#[from] IndiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    pub fn invalid_command(command: impl Into<String>, message: impl Into<String>) -> Self {
        CameraError::InvalidCommand {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// Result type for camera operations
pub type CameraResult<T> = Result<T, CameraError>;
