//! Error taxonomy reported to bridge callers.

use crate::infrastructure::bluetooth::transport::TransportError;
use thiserror::Error;

/// Failures surfaced through the command dispatcher.
///
/// Every variant maps to one wire code (see [`BridgeError::code`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bluetooth permission not granted")]
    PermissionDenied,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("No foreground context available to host the request")]
    ActivityNotAvailable,

    #[error("Bluetooth is not available on this device")]
    BluetoothNotAvailable,

    #[error("Bluetooth is not enabled")]
    BluetoothDisabled,

    #[error("{0}")]
    ConnectionError(String),

    #[error("Not connected to any device")]
    NotConnected,

    #[error("{0}")]
    WriteError(String),
}

impl BridgeError {
    /// Wire code used in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::ActivityNotAvailable => "ACTIVITY_NOT_AVAILABLE",
            Self::BluetoothNotAvailable => "BLUETOOTH_NOT_AVAILABLE",
            Self::BluetoothDisabled => "BLUETOOTH_DISABLED",
            Self::ConnectionError(_) => "CONNECTION_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::WriteError(_) => "WRITE_ERROR",
        }
    }

    /// Translate a backend failure raised while opening a link.
    pub fn connection(err: TransportError) -> Self {
        match err {
            TransportError::AdapterUnavailable | TransportError::AdapterDisabled => {
                Self::BluetoothDisabled
            }
            other => Self::ConnectionError(other.to_string()),
        }
    }

    /// Translate a backend failure raised while writing a chunk.
    pub fn write(err: TransportError) -> Self {
        match err {
            TransportError::NoWritableCharacteristic | TransportError::LinkClosed => {
                Self::NotConnected
            }
            other => Self::WriteError(other.to_string()),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
