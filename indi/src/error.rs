//! INDI error types
//!
//! Provides structured error types for device-server operations.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the INDI device server
#[derive(Debug, Clone, Error)]
pub enum IndiError {
    /// The command FIFO the server listens on does not exist
    #[error("Command channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Malformed request, unparsable output or non-zero exit of a tool
    #[error("Invalid command '{command}': {message}")]
    InvalidCommand {
        command: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// I/O failure talking to the command endpoint
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// An external tool did not finish in time
    #[error("Command '{command}' timed out after {duration:?}")]
    Timeout { command: String, duration: Duration },

    /// A property reported Alert while we waited on it
    #[error("Device alert: {device}.{property}")]
    DeviceAlert { device: String, property: String },

    /// Property value could not be interpreted
    #[error("Unexpected value '{value}' for {path}")]
    InvalidValue { path: String, value: String },

    /// Operation attempted without its required setup
    #[error("Precondition failed: {0}")]
    Precondition(String),
}

impl IndiError {
    /// Create an invalid command error without an exit code
    pub fn invalid_command(command: impl Into<String>, message: impl Into<String>) -> Self {
        IndiError::InvalidCommand {
            command: command.into(),
            exit_code: None,
            message: message.into(),
        }
    }

    /// Create an invalid command error for a tool that exited non-zero
    pub fn exit_status(command: impl Into<String>, exit_code: Option<i32>, stderr: &str) -> Self {
        let code = exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            format!("exited with {}", code)
        } else {
            format!("exited with {}: {}", code, stderr)
        };
        IndiError::InvalidCommand {
            command: command.into(),
            exit_code,
            message,
        }
    }

    /// Exit code carried by the error, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            IndiError::InvalidCommand { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndiError::ChannelUnavailable("/tmp/indiFIFO".to_string());
        assert_eq!(err.to_string(), "Command channel unavailable: /tmp/indiFIFO");

        let err = IndiError::invalid_command("indi_getprop Mount.*.*", "no output");
        assert_eq!(
            err.to_string(),
            "Invalid command 'indi_getprop Mount.*.*': no output"
        );
    }

    #[test]
    fn test_exit_status_carries_code() {
        let err = IndiError::exit_status("indi_setprop Mount.CONNECTION.CONNECT=On", Some(2), "");
        assert_eq!(err.exit_code(), Some(2));
        assert!(err.to_string().contains("exited with 2"));
        assert!(err.to_string().contains("Mount.CONNECTION.CONNECT=On"));

        let err = IndiError::exit_status("indi_getprop x.y.z", Some(1), "No such property\n");
        assert!(err.to_string().ends_with("No such property"));
    }

    #[test]
    fn test_timeout_display() {
        let err = IndiError::Timeout {
            command: "indi_getprop Camera.*.*".to_string(),
            duration: Duration::from_secs(10),
        };
        let msg = err.to_string();
        assert!(msg.contains("Camera.*.*"));
        assert!(msg.contains("10s"));
        assert_eq!(err.exit_code(), None);
    }
}
