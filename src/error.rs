//! # Error Types
//!
//! Fault taxonomy for the CanSat gateway using `thiserror`.
//!
//! Each fault class maps to one recovery policy in the gateway loop:
//!
//! | Error          | When                     | Policy                        |
//! |----------------|--------------------------|-------------------------------|
//! | `ConfigError`  | startup only             | fatal, exit non-zero          |
//! | `LinkError`    | receive attempt          | log, back off, retry          |
//! | `DecodeError`  | payload interpretation   | log, keep raw bytes           |
//! | `StoreError`   | snapshot read/write      | log, previous snapshot stands |

use std::path::PathBuf;
use thiserror::Error;

/// Radio or configuration-file setup failure. Fatal before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Radio device could not be opened
    #[error("failed to open radio device {path}: {reason}")]
    DeviceUnavailable { path: String, reason: String },

    /// Radio did not answer a command
    #[error("radio did not respond to {command}")]
    NoResponse { command: String },

    /// Radio answered a command with an error code
    #[error("radio rejected {command} with error code {code}")]
    Rejected { command: String, code: String },

    /// Requested setting cannot be applied by this radio
    #[error("unsupported link setting: {0}")]
    Unsupported(String),

    /// Transport failure while configuring
    #[error("I/O error while configuring radio: {0}")]
    Io(#[from] std::io::Error),
}

/// Hardware or transport fault during a receive attempt. Never fatal.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Reading from the transport failed
    #[error("radio transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The transport was closed underneath us
    #[error("radio transport closed")]
    Closed,

    /// The radio produced a line we could not parse
    #[error("malformed radio frame: {0}")]
    Malformed(String),

    /// Fault reported by a simulated or otherwise abstract link
    #[error("radio fault: {0}")]
    Fault(String),
}

/// Packet bytes are not the expected text encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload is not ASCII text (byte 0x{byte:02X} at offset {offset})")]
pub struct DecodeError {
    /// Offset of the first offending byte
    pub offset: usize,
    /// The offending byte
    pub byte: u8,
}

/// Snapshot file persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure on the snapshot path
    #[error("snapshot I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot file exists but does not hold a valid snapshot
    #[error("snapshot file {} is not a valid snapshot: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot could not be serialized
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Main error type for the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Startup configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Radio link errors
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Payload decoding errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Snapshot store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Short fault class name used in log lines
    pub fn class(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "ConfigError",
            GatewayError::Link(_) => "LinkError",
            GatewayError::Decode(_) => "DecodeError",
            GatewayError::Store(_) => "IoError",
        }
    }

    /// Only configuration faults stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Config(_))
    }
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;
