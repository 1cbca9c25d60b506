//! Error types for the device layer.
//!
//! `DeviceError` is the single error type returned by device interfaces and
//! the device manager. Using `thiserror`, it separates the failures a caller
//! has to react to differently:
//!
//! - **`Session`**: a raw error from the session layer that has not passed
//!   through the manager's I/O handler yet (e.g. when driving a
//!   `DeviceInterface` directly).
//! - **`Communication`**: a transport failure that was intercepted at the
//!   manager boundary. It has already been reported to the manager's
//!   observer, and carries the device address and the failed operation.
//!   Use [`FailSoft`](crate::io_handling::FailSoft) to turn it into an absent
//!   result for unattended runs.
//! - **`UnknownAddress`**: no interface is registered for the address. This
//!   is a usage mistake, so it is never suppressed.
//! - **`UnsupportedEncoding`**, **`UnsupportedDatatype`**,
//!   **`InvalidChunkSize`**: invalid arguments, rejected before any I/O.
//! - **`Config`**: configuration could not be loaded or failed validation.

use thiserror::Error;

use crate::config::ConfigError;
use crate::io_handling::Operation;
use crate::session::SessionError;

/// Convenience alias for results using the device error type.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors raised by device interfaces and the device manager.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Error reported by the session layer.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Transport failure intercepted (and already logged) by the I/O handler.
    #[error("Communication with {address} failed during {operation}: {source}")]
    Communication {
        /// Address of the device that failed.
        address: String,
        /// Operation that was running.
        operation: Operation,
        /// Underlying session error.
        #[source]
        source: SessionError,
    },

    /// No interface is registered under the address.
    #[error("No device interface registered for address: {0}")]
    UnknownAddress(String),

    /// Encoding name other than `ascii` or `bytes`.
    #[error("Unsupported encoding {0:?}, expected \"ascii\" or \"bytes\"")]
    UnsupportedEncoding(String),

    /// Datatype tag that has no binary representation.
    #[error("Unsupported datatype tag {0:?}")]
    UnsupportedDatatype(String),

    /// Chunk sizes must be positive.
    #[error("Chunk size must be a positive number of bytes")]
    InvalidChunkSize,

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DeviceError {
    /// Returns `true` for transport failures intercepted by the I/O handler.
    pub fn is_communication(&self) -> bool {
        matches!(self, DeviceError::Communication { .. })
    }

    /// Address of the device involved, when the error carries one.
    pub fn address(&self) -> Option<&str> {
        match self {
            DeviceError::Communication { address, .. } | DeviceError::UnknownAddress(address) => {
                Some(address)
            }
            _ => None,
        }
    }
}
