//! Error types for emerald-core.
//!
//! Session failures fall into three groups:
//!
//! | Group | Variants | Effect |
//! |-------|----------|--------|
//! | Fatal | [`Error::ConnectionFailed`], [`Error::IdentificationFailed`], [`Error::SubscribeFailed`], [`Error::WriteFailed`], [`Error::ConnectionLost`] | `run` returns the error after teardown |
//! | Per-frame | (none) | Malformed frames are logged and skipped |
//! | Best-effort | any error from reset, unsubscribe, disconnect | Logged, never returned |
//!
//! The remaining variants are produced by transports and are wrapped into
//! one of the fatal variants by the session.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to an advisor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during scan or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required GATT characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Data received from the device could not be used.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The cancellation token was raised before the link was up.
    #[error("Operation cancelled")]
    Cancelled,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Reading the device identity failed.
    #[error("Identification failed reading {characteristic}: {reason}")]
    IdentificationFailed {
        /// Name of the Device Information characteristic being read.
        characteristic: &'static str,
        /// The reason for the failure.
        reason: String,
    },

    /// Subscribing to the telemetry characteristic failed.
    #[error("Subscribe failed on characteristic {uuid}: {reason}")]
    SubscribeFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The transport stopped delivering notifications while streaming.
    #[error("Connection lost while streaming")]
    ConnectionLost,

    /// Transport settings that cannot work, such as a zero timeout.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// The device was not seen during the scan.
    NotFound,
    /// Connection attempt timed out.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::NotFound => write!(f, "device not found"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Why the advisor could not be located.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified address not found.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Wrap a transport error raised while connecting.
    ///
    /// Errors that already are [`Error::ConnectionFailed`] pass through unchanged.
    pub fn into_connection_failure(self, device_id: &str) -> Self {
        let reason = match self {
            Self::ConnectionFailed { .. } => return self,
            Self::DeviceNotFound(DeviceNotFoundReason::NoAdapter) => {
                ConnectionFailureReason::AdapterUnavailable
            }
            Self::DeviceNotFound(_) => ConnectionFailureReason::NotFound,
            Self::Timeout { .. } => ConnectionFailureReason::Timeout,
            Self::Bluetooth(e) => ConnectionFailureReason::BleError(e.to_string()),
            other => ConnectionFailureReason::Other(other.to_string()),
        };
        Self::connection_failed(Some(device_id.to_string()), reason)
    }
}

/// Result type alias using emerald-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
