//! Error types for the PM5 link.
//!
//! All errors implement `std::error::Error` and carry enough structured context
//! to decide whether an operation is worth retrying.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: the link could not be opened, or a read/write failed
//! - **Format Errors**: a notification or response was shorter than its layout
//! - **Checksum / Protocol Errors**: a command response frame is corrupt
//! - **Capability Errors**: a characteristic is absent on the connected device
//! - **State Errors**: an operation was issued in the wrong connection state
//!
//! Decode failures are scoped to a single notification; the session reports
//! them as events and keeps running.
//!
//! ```rust
//! use pm5_link::Pm5Error;
//!
//! let error = Pm5Error::transport_failed("adapter powered off");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::types::ConnectionState;

/// Result type alias for PM5 link operations.
pub type Result<T, E = Pm5Error> = std::result::Result<T, E>;

/// Main error type for PM5 link operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Pm5Error {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{context} frame too short: expected at least {expected} bytes, got {actual}")]
    Format { context: &'static str, expected: usize, actual: usize },

    #[error("Checksum mismatch: expected {expected:#04x}, computed {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Protocol error in {context}: {details}")]
    Protocol { context: &'static str, details: String },

    #[error("Invalid command: {details}")]
    InvalidCommand { details: String },

    #[error("Characteristic '{name}' is not available on this device")]
    CapabilityMissing { name: String },

    #[error("Cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: ConnectionState },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Configuration error: {details}")]
    Config { details: String },
}

impl Pm5Error {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Pm5Error::Transport { .. } => true,
            Pm5Error::Timeout { .. } => true,
            Pm5Error::Checksum { .. } => true,
            Pm5Error::Format { .. } => false,
            Pm5Error::Protocol { .. } => false,
            Pm5Error::InvalidCommand { .. } => false,
            Pm5Error::CapabilityMissing { .. } => false,
            Pm5Error::InvalidState { .. } => false,
            Pm5Error::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Pm5Error::Transport { .. } => vec![
                "Check the Bluetooth adapter is powered on",
                "Move closer to the monitor or wake it from sleep",
                "Reconnect the session",
            ],
            Pm5Error::Format { .. } => vec![
                "Check the monitor firmware is up to date",
                "Verify the notification came from the expected characteristic",
            ],
            Pm5Error::Checksum { .. } => vec![
                "Resend the command",
                "Check for interference on the link",
            ],
            Pm5Error::Protocol { .. } => vec![
                "Verify the response characteristic is paired with the command characteristic",
                "Resend the command after the monitor finishes its current frame",
            ],
            Pm5Error::InvalidCommand { .. } => vec![
                "Use short opcodes (0x80 and above) without parameters",
                "Keep parameters under 256 bytes and frames under 120 bytes",
            ],
            Pm5Error::CapabilityMissing { .. } => vec![
                "Query the session capabilities before subscribing",
                "Check the monitor model supports this characteristic",
            ],
            Pm5Error::InvalidState { .. } => vec![
                "Connect the session before issuing this operation",
                "Wait for the session to become ready",
            ],
            Pm5Error::Timeout { .. } => vec![
                "Increase the configured timeout",
                "Check the monitor is awake and in range",
            ],
            Pm5Error::Config { .. } => vec![
                "Check the configuration values are positive",
                "Verify the configuration file is valid YAML",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        Pm5Error::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Pm5Error::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for truncated frames.
    pub fn format(context: &'static str, expected: usize, actual: usize) -> Self {
        Pm5Error::Format { context, expected, actual }
    }

    /// Helper constructor for absent characteristics.
    pub fn capability_missing(name: impl Into<String>) -> Self {
        Pm5Error::CapabilityMissing { name: name.into() }
    }

    /// Helper constructor for operations issued in the wrong state.
    pub fn invalid_state(operation: &'static str, state: ConnectionState) -> Self {
        Pm5Error::InvalidState { operation, state }
    }

    /// Whether the error came from the link rather than from the bytes on it.
    pub fn is_transport(&self) -> bool {
        matches!(self, Pm5Error::Transport { .. })
    }
}

impl From<serde_yaml_ng::Error> for Pm5Error {
    fn from(err: serde_yaml_ng::Error) -> Self {
        Pm5Error::Config { details: err.to_string() }
    }
}
