//! Error types for rig control and simulation.
//!
//! Every fallible operation in the crate returns [`RigError`]. Framing-level
//! failures (short reads, unknown ids) are normally absorbed by the packet
//! realignment cycle and only surface here when auto-realignment is disabled.
//! Protocol-level contract violations (bad ping nonce, invalid action) always
//! propagate to the caller.
//!
//! ## Error Categories
//!
//! - **Decode Errors**: malformed or short payload bytes
//! - **Packet Errors**: unknown identifier bytes and failed packet reads
//! - **Connection Errors**: liveness failures and channel I/O problems
//! - **Agent Errors**: invalid actions, missing observations, non-finite states
//! - **Configuration Errors**: invalid parameters or unparsable YAML
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use cartpole_rig::RigError;
//!
//! let error = RigError::connection_failed("controller did not answer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use crate::codec::DecodeError;

/// Result type alias for rig operations.
pub type Result<T, E = RigError> = std::result::Result<T, E>;

/// Main error type for rig operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RigError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Unknown packet id {id:#04x}")]
    UnknownPacket { id: u8 },

    #[error("Packet with id {} ({id:#04x}) failed: {reason}. {dump}", crate::network::dump::printable(.id))]
    PacketRead { id: u8, reason: String, dump: String },

    #[error("Connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("Invalid action {action}: expected a value in 0..{n}")]
    InvalidAction { action: i64, n: usize },

    #[error("No observation available yet for agent '{agent}'")]
    StateUnavailable { agent: String },

    #[error("Numerical failure: {reason}")]
    Numerical { reason: String },

    #[error("Packet {packet} cannot be {direction}")]
    Direction { packet: &'static str, direction: &'static str },

    #[error("Packet id {id:#04x} is claimed by both {first} and {second}")]
    DuplicatePacketId { id: u8, first: &'static str, second: &'static str },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Configuration parse error")]
    ConfigParse(#[from] serde_yaml_ng::Error),

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RigError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RigError::Decode(_) => true,
            RigError::UnknownPacket { .. } => true,
            RigError::Connection { .. } => true,
            RigError::Timeout { .. } => true,
            RigError::StateUnavailable { .. } => true,
            RigError::PacketRead { .. } => false,
            RigError::Cancelled { .. } => false,
            RigError::InvalidAction { .. } => false,
            RigError::Numerical { .. } => false,
            RigError::Direction { .. } => false,
            RigError::DuplicatePacketId { .. } => false,
            RigError::InvalidArgument { .. } => false,
            RigError::Config { .. } => false,
            RigError::ConfigParse(_) => false,
            RigError::Io { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RigError::Decode(_) | RigError::UnknownPacket { .. } => vec![
                "Enable automatic packet realignment",
                "Check that controller firmware and packet table versions match",
                "Check the serial cable for noise",
            ],
            RigError::PacketRead { .. } => vec![
                "Inspect the hex dump for the offending bytes",
                "Enable automatic packet realignment",
            ],
            RigError::Connection { .. } => vec![
                "Check the controller is powered and connected",
                "Verify the serial port path",
                "Power-cycle the controller and reconnect",
            ],
            RigError::Timeout { .. } => vec![
                "Increase the session response timeout",
                "Verify the controller is responding",
            ],
            RigError::Cancelled { .. } => vec!["Restart the operation if cancellation was unintended"],
            RigError::InvalidAction { .. } => vec!["Use an action index inside the action space"],
            RigError::StateUnavailable { .. } => vec![
                "Digest more packets before observing",
                "Reset the environment before stepping",
            ],
            RigError::Numerical { .. } => vec![
                "Reduce the timestep or raise the integration resolution",
                "Check physical parameters for implausible values",
            ],
            RigError::Direction { .. } => vec!["Only send outbound-capable packets"],
            RigError::DuplicatePacketId { .. } => vec!["Assign a unique id to every packet type"],
            RigError::InvalidArgument { .. } => vec!["Check the combination of options passed"],
            RigError::Config { .. } | RigError::ConfigParse(_) => vec![
                "Check the configuration file against the documented fields",
                "Start from one of the built-in presets",
            ],
            RigError::Io { .. } => vec![
                "Check the device path exists and is readable",
                "Check file permissions",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        RigError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RigError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for timeouts.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        RigError::Timeout { operation: operation.into(), duration }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        RigError::Cancelled { operation: operation.into() }
    }

    pub fn numerical(reason: impl Into<String>) -> Self {
        RigError::Numerical { reason: reason.into() }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        RigError::InvalidArgument { reason: reason.into() }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        RigError::Config { reason: reason.into() }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RigError::Io { context: context.into(), source }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        RigError::Io { context: path.display().to_string(), source }
    }
}

impl From<std::io::Error> for RigError {
    fn from(err: std::io::Error) -> Self {
        RigError::Io { context: "<unknown>".to_string(), source: err }
    }
}
