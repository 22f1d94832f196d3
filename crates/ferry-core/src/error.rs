//! Error types for Ferry

use thiserror::Error;

use crate::connection::ConnectionId;
use crate::identity::HostId;
use crate::message::MessageId;

/// Top-level error type for Ferry
#[derive(Debug, Error)]
pub enum FerryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),
}

/// Errors raised while reading settings
///
/// These surface at construction time and abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing setting {namespace}.{key}")]
    Missing { namespace: String, key: String },

    #[error("Invalid value {value:?} for {namespace}.{key}: {reason}")]
    Invalid {
        namespace: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

/// Router bookkeeping violations
///
/// Hitting one of these means the transfer protocol state is corrupt and the
/// simulation run cannot continue.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("No message {id} in buffer of {host}")]
    UnknownMessage { host: HostId, id: MessageId },

    #[error("No incoming transfer of {id} from {from} at {host}")]
    NoIncomingTransfer {
        host: HostId,
        id: MessageId,
        from: HostId,
    },

    #[error("Unknown host {0}")]
    UnknownHost(HostId),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection {0} already carries a transfer")]
    ConnectionBusy(ConnectionId),
}

/// Result type alias for Ferry operations
pub type FerryResult<T> = Result<T, FerryError>;

/// Result type alias for settings lookups
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for router operations
pub type RouterResult<T> = Result<T, RouterError>;
