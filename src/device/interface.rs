//! Per-instrument device interface.
//!
//! A [`DeviceInterface`] owns exactly one open session and translates a
//! small set of options into the matching session operation. Every
//! successful read is appended to the interface's history.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::error::{DeviceError, DeviceResult};
use crate::session::{ByteOrder, DataType, Session, SessionManager};

/// Wire encoding of a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Text commands and responses.
    Ascii,
    /// IEEE 488.2 binary blocks.
    Bytes,
}

impl FromStr for Encoding {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Ok(Encoding::Ascii),
            "bytes" => Ok(Encoding::Bytes),
            _ => Err(DeviceError::UnsupportedEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Ascii => f.write_str("ascii"),
            Encoding::Bytes => f.write_str("bytes"),
        }
    }
}

/// One entry of a device's read history.
///
/// Serializes untagged: a JSON string or an array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    /// Response to an ASCII query.
    Text(String),
    /// Values decoded from a binary block.
    Values(Vec<f64>),
}

impl Reading {
    /// Text of an ASCII reading.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reading::Text(text) => Some(text),
            Reading::Values(_) => None,
        }
    }

    /// Values of a binary reading.
    pub fn as_values(&self) -> Option<&[f64]> {
        match self {
            Reading::Values(values) => Some(values),
            Reading::Text(_) => None,
        }
    }
}

/// Value-encoding options of a write.
///
/// Only used when values are sent; a bare message ignores all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Appended after the values.
    pub termination: String,
    /// Element type of binary blocks.
    pub datatype: DataType,
    /// Byte order of binary blocks.
    pub byte_order: ByteOrder,
    /// Separator between ASCII values.
    pub separator: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            termination: "\n".to_string(),
            datatype: DataType::Float32,
            byte_order: ByteOrder::Little,
            separator: ",".to_string(),
        }
    }
}

impl WriteOptions {
    /// Set the termination.
    pub fn with_termination(mut self, termination: &str) -> Self {
        self.termination = termination.to_string();
        self
    }

    /// Set the binary datatype.
    pub fn with_datatype(mut self, datatype: DataType) -> Self {
        self.datatype = datatype;
        self
    }

    /// Select big- or little-endian binary blocks.
    pub fn big_endian(mut self, is_big_endian: bool) -> Self {
        self.byte_order = ByteOrder::from_big_endian(is_big_endian);
        self
    }

    /// Set the ASCII separator.
    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }
}

/// Creates device interfaces for the device manager.
pub trait InterfaceFactory: Send {
    /// Create an interface bound to `address`, opening its session through
    /// `sessions`.
    ///
    /// # Errors
    /// Returns an error if the session cannot be opened.
    fn create_interface(
        &self,
        sessions: &dyn SessionManager,
        address: &str,
    ) -> DeviceResult<DeviceInterface>;
}

/// Factory opening one session per interface through the session manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInterfaceFactory;

impl InterfaceFactory for DefaultInterfaceFactory {
    fn create_interface(
        &self,
        sessions: &dyn SessionManager,
        address: &str,
    ) -> DeviceResult<DeviceInterface> {
        DeviceInterface::open(sessions, address)
    }
}

/// Typed reads and writes over one exclusively-owned session.
pub struct DeviceInterface {
    address: String,
    session: Box<dyn Session>,
    retrieved_data: Vec<Reading>,
}

impl DeviceInterface {
    /// Open a session to `address` and wrap it.
    ///
    /// # Errors
    /// Returns [`DeviceError::Session`] if the session cannot be opened.
    pub fn open(sessions: &dyn SessionManager, address: &str) -> DeviceResult<Self> {
        let session = sessions.open_session(address)?;
        debug!(address = %address, "Opened device session");
        Ok(Self::from_session(address, session))
    }

    /// Wrap an already open session.
    pub fn from_session(address: impl Into<String>, session: Box<dyn Session>) -> Self {
        Self {
            address: address.into(),
            session,
            retrieved_data: Vec::new(),
        }
    }

    /// Address this interface is bound to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Every successful read result, oldest first.
    pub fn retrieved_data(&self) -> &[Reading] {
        &self.retrieved_data
    }

    /// Current chunk size of the session.
    pub fn chunk_size(&self) -> usize {
        self.session.chunk_size()
    }

    /// Change the session's chunk size.
    ///
    /// # Errors
    /// Returns [`DeviceError::InvalidChunkSize`] for zero.
    pub fn set_chunk_size(&mut self, chunk_size: usize) -> DeviceResult<()> {
        if chunk_size == 0 {
            return Err(DeviceError::InvalidChunkSize);
        }
        self.session.set_chunk_size(chunk_size);
        Ok(())
    }

    /// Read from the instrument and append the result to the history.
    ///
    /// With [`Encoding::Ascii`], `command` is sent as a query and the text
    /// response is stored. With [`Encoding::Bytes`], one binary block is
    /// read; `command` is not sent. A `chunk_size` is applied to the
    /// session before the read and stays in effect afterwards.
    ///
    /// # Errors
    /// - [`DeviceError::InvalidChunkSize`] for a zero chunk size (no I/O)
    /// - [`DeviceError::Session`] if the session fails; nothing is appended
    pub fn read(
        &mut self,
        encoding: Encoding,
        command: &str,
        chunk_size: Option<usize>,
    ) -> DeviceResult<()> {
        if let Some(chunk_size) = chunk_size {
            self.set_chunk_size(chunk_size)?;
        }

        let reading = match encoding {
            Encoding::Ascii => Reading::Text(self.session.query(command)?),
            Encoding::Bytes => Reading::Values(self.session.read_binary_block()?),
        };
        debug!(address = %self.address, %encoding, command = %command, "Read from device");
        self.retrieved_data.push(reading);
        Ok(())
    }

    /// Write to the instrument.
    ///
    /// Without values (or with an empty slice) `message` is sent verbatim
    /// and `options` are ignored. Otherwise the values follow `message`,
    /// as separated text for [`Encoding::Ascii`] or as a binary block for
    /// [`Encoding::Bytes`], then `options.termination`.
    ///
    /// # Errors
    /// Returns [`DeviceError::Session`] if encoding or the transfer fails.
    pub fn write(
        &mut self,
        encoding: Encoding,
        message: &str,
        values: Option<&[f64]>,
        options: &WriteOptions,
    ) -> DeviceResult<()> {
        let written = match values {
            None | Some([]) => self.session.write(message)?,
            Some(values) => match encoding {
                Encoding::Ascii => self.session.write_ascii_values(
                    message,
                    values,
                    &options.separator,
                    &options.termination,
                )?,
                Encoding::Bytes => self.session.write_binary_values(
                    message,
                    values,
                    options.datatype,
                    options.byte_order,
                    &options.termination,
                )?,
            },
        };
        debug!(address = %self.address, %encoding, bytes = written, "Wrote to device");
        Ok(())
    }
}

impl fmt::Debug for DeviceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInterface")
            .field("address", &self.address)
            .field("session", &self.session.resource_name())
            .field("retrieved_data", &self.retrieved_data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{MockEventKind, MockFault, MockSessionManager};
    use crate::session::SessionError;

    const ADDR: &str = "TCPIP::1.2.3.4::INSTR";

    fn interface() -> (DeviceInterface, MockSessionManager) {
        let sessions = MockSessionManager::new();
        let interface = DefaultInterfaceFactory
            .create_interface(&sessions, ADDR)
            .unwrap();
        (interface, sessions)
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!("ascii".parse::<Encoding>().unwrap(), Encoding::Ascii);
        assert_eq!("BYTES".parse::<Encoding>().unwrap(), Encoding::Bytes);
        assert!(matches!(
            "utf8".parse::<Encoding>(),
            Err(DeviceError::UnsupportedEncoding(name)) if name == "utf8"
        ));
        assert_eq!(Encoding::Bytes.to_string(), "bytes");
    }

    #[test]
    fn test_new_interface_has_empty_history() {
        let (interface, _) = interface();
        assert_eq!(interface.address(), ADDR);
        assert!(interface.retrieved_data().is_empty());
    }

    #[test]
    fn test_ascii_read_appends_response() {
        let (mut interface, sessions) = interface();
        sessions.instrument(ADDR).respond("*IDN?", "ACME,Model1,0,1.0");

        interface.read(Encoding::Ascii, "*IDN?", None).unwrap();
        assert_eq!(
            interface.retrieved_data(),
            &[Reading::Text("ACME,Model1,0,1.0".to_string())]
        );
    }

    #[test]
    fn test_binary_read_sends_no_command() {
        let (mut interface, sessions) = interface();
        let instrument = sessions.instrument(ADDR);
        instrument.push_values(&[0.5, 1.5, -2.0]).unwrap();

        interface.read(Encoding::Bytes, "CURV?", None).unwrap();
        assert_eq!(
            interface.retrieved_data()[0].as_values(),
            Some(&[0.5, 1.5, -2.0][..])
        );
        assert_eq!(instrument.events_for(1), vec![MockEventKind::ReadBinary]);
    }

    #[test]
    fn test_chunk_size_applied_before_read() {
        let (mut interface, sessions) = interface();
        let instrument = sessions.instrument(ADDR);
        instrument.respond("*IDN?", "ACME");

        interface.read(Encoding::Ascii, "*IDN?", Some(1024)).unwrap();
        assert_eq!(interface.chunk_size(), 1024);
        assert_eq!(
            instrument.events_for(1),
            vec![
                MockEventKind::SetChunkSize(1024),
                MockEventKind::Query("*IDN?".to_string()),
            ]
        );
    }

    #[test]
    fn test_zero_chunk_size_rejected_before_io() {
        let (mut interface, sessions) = interface();
        let err = interface.read(Encoding::Ascii, "*IDN?", Some(0)).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidChunkSize));
        assert!(sessions.instrument(ADDR).events().is_empty());
        assert!(interface.retrieved_data().is_empty());
    }

    #[test]
    fn test_failed_read_appends_nothing() {
        let (mut interface, sessions) = interface();
        let instrument = sessions.instrument(ADDR);
        instrument.respond("MEAS?", "1.25").fail_next(MockFault::Timeout);

        let err = interface.read(Encoding::Ascii, "MEAS?", None).unwrap_err();
        assert!(matches!(err, DeviceError::Session(SessionError::Timeout(_))));
        assert!(interface.retrieved_data().is_empty());

        interface.read(Encoding::Ascii, "MEAS?", None).unwrap();
        assert_eq!(interface.retrieved_data().len(), 1);
    }

    #[test]
    fn test_history_keeps_read_order() {
        let (mut interface, sessions) = interface();
        let instrument = sessions.instrument(ADDR);
        instrument.respond("A?", "first").respond("B?", "second");
        instrument.push_values(&[3.0]).unwrap();

        interface.read(Encoding::Ascii, "A?", None).unwrap();
        interface.read(Encoding::Bytes, "", None).unwrap();
        interface.read(Encoding::Ascii, "B?", None).unwrap();

        assert_eq!(
            interface.retrieved_data(),
            &[
                Reading::Text("first".into()),
                Reading::Values(vec![3.0]),
                Reading::Text("second".into()),
            ]
        );
    }

    #[test]
    fn test_write_without_values_is_verbatim() {
        let (mut interface, sessions) = interface();
        let options = WriteOptions::default()
            .with_termination("\r\n")
            .with_datatype(DataType::Int8)
            .big_endian(true)
            .with_separator(";");

        interface
            .write(Encoding::Bytes, "OUTP ON", None, &options)
            .unwrap();
        interface
            .write(Encoding::Ascii, "*CLS", Some(&[]), &options)
            .unwrap();

        assert_eq!(
            sessions.instrument(ADDR).writes(),
            vec![b"OUTP ON".to_vec(), b"*CLS".to_vec()]
        );
    }

    #[test]
    fn test_ascii_write_payload() {
        let (mut interface, sessions) = interface();
        interface
            .write(
                Encoding::Ascii,
                "SOUR:LIST ",
                Some(&[1.0, 2.0, 3.0]),
                &WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(
            sessions.instrument(ADDR).writes(),
            vec![b"SOUR:LIST 1,2,3\n".to_vec()]
        );
    }

    #[test]
    fn test_binary_write_payload() {
        let (mut interface, sessions) = interface();
        let options = WriteOptions::default()
            .with_datatype(DataType::UInt16)
            .big_endian(true)
            .with_termination("\n");

        interface
            .write(Encoding::Bytes, "DATA ", Some(&[1.0, 258.0]), &options)
            .unwrap();
        assert_eq!(
            sessions.instrument(ADDR).writes(),
            vec![b"DATA #14\x00\x01\x01\x02\n".to_vec()]
        );
    }

    #[test]
    fn test_reading_serializes_untagged() {
        let history = vec![Reading::Text("ACME".into()), Reading::Values(vec![1.0, 2.5])];
        assert_eq!(
            serde_json::to_string(&history).unwrap(),
            r#"["ACME",[1.0,2.5]]"#
        );
    }
}
