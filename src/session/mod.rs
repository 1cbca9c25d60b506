//! Instrument session capability
//!
//! Hardware-agnostic interface to an open instrument session. Backends
//! (VISA libraries, socket transports, simulators) implement
//! [`SessionManager`] and [`Session`]; the device layer only talks to these
//! traits.
//!
//! Supports resource strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
//! - "TCPIP::192.168.1.100::5025::SOCKET" (raw socket)

pub mod block;
pub mod mock;

use thiserror::Error;

pub use block::{BlockError, ByteOrder, DataType};

/// Default I/O chunk size in bytes for newly opened sessions.
pub const DEFAULT_CHUNK_SIZE: usize = 20 * 1024;

/// Convenience alias for session-level results.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Errors raised by a session backend.
///
/// Every variant except [`SessionError::Block`] is a communication failure:
/// the instrument or the link misbehaved. `Block` is a local encoding
/// problem with the caller's values.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No response within the transport timeout.
    #[error("I/O operation timed out: {0}")]
    Timeout(String),

    /// Link dropped or the instrument went away.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Resource could not be opened.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response could not be interpreted.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Values could not be encoded for transmission.
    #[error("Block encoding error: {0}")]
    Block(#[from] BlockError),
}

impl SessionError {
    /// Returns `true` for failures of the instrument link itself.
    pub fn is_communication(&self) -> bool {
        !matches!(self, SessionError::Block(_))
    }
}

/// An open session to one instrument.
///
/// ## Ownership
/// A session is owned by exactly one device interface. Implementations
/// need not be thread-safe beyond `Send`; callers serialize access.
pub trait Session: Send {
    /// Resource string this session was opened with.
    fn resource_name(&self) -> &str;

    /// Write a command and read the textual response.
    ///
    /// # Errors
    /// - Hardware communication error
    /// - Timeout (no response)
    fn query(&mut self, command: &str) -> SessionResult<String>;

    /// Read one binary block and decode it into values.
    ///
    /// No command is written; the instrument must already be sending.
    ///
    /// # Errors
    /// - Hardware communication error
    /// - Malformed block
    fn read_binary_block(&mut self) -> SessionResult<Vec<f64>>;

    /// Write `message` verbatim. Returns the number of bytes written.
    ///
    /// # Errors
    /// - Hardware communication error
    fn write(&mut self, message: &str) -> SessionResult<usize>;

    /// Write `message` followed by the values as text and `termination`.
    ///
    /// # Errors
    /// - Hardware communication error
    fn write_ascii_values(
        &mut self,
        message: &str,
        values: &[f64],
        separator: &str,
        termination: &str,
    ) -> SessionResult<usize>;

    /// Write `message` followed by the values as an IEEE 488.2 block and
    /// `termination`.
    ///
    /// # Errors
    /// - [`SessionError::Block`] if a value does not fit `datatype`
    /// - Hardware communication error
    fn write_binary_values(
        &mut self,
        message: &str,
        values: &[f64],
        datatype: DataType,
        byte_order: ByteOrder,
        termination: &str,
    ) -> SessionResult<usize>;

    /// Current I/O chunk size in bytes.
    fn chunk_size(&self) -> usize;

    /// Change the I/O chunk size used by subsequent reads.
    fn set_chunk_size(&mut self, chunk_size: usize);
}

/// Opens sessions by resource address.
pub trait SessionManager: Send {
    /// Open a session to `address`.
    ///
    /// # Errors
    /// Returns a communication error if the resource cannot be opened.
    fn open_session(&self, address: &str) -> SessionResult<Box<dyn Session>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_communication_classification() {
        assert!(SessionError::Timeout("read".into()).is_communication());
        assert!(SessionError::ConnectionLost("reset by peer".into()).is_communication());
        assert!(SessionError::ResourceNotFound("GPIB0::9::INSTR".into()).is_communication());
        assert!(SessionError::MalformedResponse("bad block".into()).is_communication());
        assert!(SessionError::Io(std::io::Error::other("broken pipe")).is_communication());
        assert!(!SessionError::Block(BlockError::TooLarge(0)).is_communication());
    }
}
