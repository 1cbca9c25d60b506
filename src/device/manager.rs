//! Registry of device interfaces keyed by address.
//!
//! The [`DeviceManager`] is the single point through which instrument I/O
//! flows. `add`, `read` and `write` run under the manager's [`IoHandler`];
//! `get_data` performs no I/O and only fails on an unknown address.
//!
//! # Example
//!
//! ```rust
//! use visa_device_manager::session::mock::MockSessionManager;
//! use visa_device_manager::{DefaultInterfaceFactory, DeviceManager, Encoding, Reading};
//!
//! let sessions = MockSessionManager::new();
//! sessions
//!     .instrument("TCPIP::1.2.3.4::INSTR")
//!     .respond("*IDN?", "ACME,Model1,0,1.0");
//!
//! let mut manager = DeviceManager::new(DefaultInterfaceFactory, sessions);
//! manager.add_new_device_interface("TCPIP::1.2.3.4::INSTR")?;
//! manager.read_from_device("TCPIP::1.2.3.4::INSTR", Encoding::Ascii, "*IDN?", None)?;
//!
//! assert_eq!(
//!     manager.get_data("TCPIP::1.2.3.4::INSTR")?,
//!     &[Reading::Text("ACME,Model1,0,1.0".to_string())]
//! );
//! # Ok::<(), visa_device_manager::DeviceError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::device::interface::{
    DeviceInterface, Encoding, InterfaceFactory, Reading, WriteOptions,
};
use crate::error::{DeviceError, DeviceResult};
use crate::io_handling::{FailSoft, IoHandler, IoObserver, Operation};
use crate::session::SessionManager;

/// Owns every device interface and dispatches I/O by address.
pub struct DeviceManager {
    devices: HashMap<String, DeviceInterface>,
    sessions: Box<dyn SessionManager>,
    factory: Box<dyn InterfaceFactory>,
    io: IoHandler,
    write_defaults: WriteOptions,
}

impl DeviceManager {
    /// Create an empty manager.
    ///
    /// Communication failures are logged through `tracing` until another
    /// observer is installed with [`DeviceManager::with_observer`].
    pub fn new(
        factory: impl InterfaceFactory + 'static,
        sessions: impl SessionManager + 'static,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            sessions: Box::new(sessions),
            factory: Box::new(factory),
            io: IoHandler::default(),
            write_defaults: WriteOptions::default(),
        }
    }

    /// Create a manager and register every enabled device of `config`.
    ///
    /// Devices that cannot be reached are reported and skipped; the rest of
    /// the configuration still applies.
    ///
    /// # Errors
    /// - [`DeviceError::Config`] if the write defaults are invalid
    /// - [`DeviceError::InvalidChunkSize`] for a zero device chunk size
    pub fn from_config(
        config: &ManagerConfig,
        factory: impl InterfaceFactory + 'static,
        sessions: impl SessionManager + 'static,
    ) -> DeviceResult<Self> {
        let mut manager = Self::new(factory, sessions).with_write_defaults(config.write_options()?);

        for device in config.enabled_devices() {
            if manager
                .add_new_device_interface(&device.address)
                .fail_soft()?
                .is_none()
            {
                continue;
            }
            if let Some(chunk_size) = device.chunk_size {
                manager.interface_mut(&device.address)?.set_chunk_size(chunk_size)?;
            }
        }

        info!(
            backend = %config.manager.backend,
            configured = config.devices.len(),
            registered = manager.len(),
            "Device manager ready"
        );
        Ok(manager)
    }

    /// Replace the observer notified of communication failures.
    pub fn with_observer(mut self, observer: Arc<dyn IoObserver>) -> Self {
        self.io = IoHandler::new(observer);
        self
    }

    /// Replace the options used by [`DeviceManager::write_with_defaults`].
    pub fn with_write_defaults(mut self, options: WriteOptions) -> Self {
        self.write_defaults = options;
        self
    }

    /// Options used by [`DeviceManager::write_with_defaults`].
    pub fn default_write_options(&self) -> &WriteOptions {
        &self.write_defaults
    }

    fn interface(&self, address: &str) -> DeviceResult<&DeviceInterface> {
        self.devices
            .get(address)
            .ok_or_else(|| DeviceError::UnknownAddress(address.to_string()))
    }

    fn interface_mut(&mut self, address: &str) -> DeviceResult<&mut DeviceInterface> {
        self.devices
            .get_mut(address)
            .ok_or_else(|| DeviceError::UnknownAddress(address.to_string()))
    }

    /// Open a session to `address` and register an interface for it.
    ///
    /// An interface already registered under `address` is replaced and its
    /// session closed. On failure the registry is left unchanged.
    ///
    /// # Errors
    /// [`DeviceError::Communication`] if the session cannot be opened.
    pub fn add_new_device_interface(&mut self, address: &str) -> DeviceResult<()> {
        let interface = self.io.run(address, Operation::Add, || {
            self.factory.create_interface(self.sessions.as_ref(), address)
        })?;

        if self.devices.insert(address.to_string(), interface).is_some() {
            debug!(address = %address, "Replaced device interface");
        } else {
            debug!(address = %address, "Registered device interface");
        }
        Ok(())
    }

    /// Read from the device at `address`; the result is appended to its
    /// history.
    ///
    /// # Errors
    /// - [`DeviceError::UnknownAddress`] if nothing is registered
    /// - [`DeviceError::InvalidChunkSize`] for a zero chunk size
    /// - [`DeviceError::Communication`] if the transfer fails
    pub fn read_from_device(
        &mut self,
        address: &str,
        encoding: Encoding,
        command: &str,
        chunk_size: Option<usize>,
    ) -> DeviceResult<()> {
        let interface = self
            .devices
            .get_mut(address)
            .ok_or_else(|| DeviceError::UnknownAddress(address.to_string()))?;
        self.io.run(address, Operation::Read, || {
            interface.read(encoding, command, chunk_size)
        })
    }

    /// Write to the device at `address`.
    ///
    /// # Errors
    /// - [`DeviceError::UnknownAddress`] if nothing is registered
    /// - [`DeviceError::Session`] if a value does not fit the datatype
    /// - [`DeviceError::Communication`] if the transfer fails
    pub fn write_to_device(
        &mut self,
        address: &str,
        encoding: Encoding,
        message: &str,
        values: Option<&[f64]>,
        options: &WriteOptions,
    ) -> DeviceResult<()> {
        let interface = self
            .devices
            .get_mut(address)
            .ok_or_else(|| DeviceError::UnknownAddress(address.to_string()))?;
        self.io.run(address, Operation::Write, || {
            interface.write(encoding, message, values, options)
        })
    }

    /// [`DeviceManager::write_to_device`] with the manager's write defaults.
    ///
    /// # Errors
    /// Same as [`DeviceManager::write_to_device`].
    pub fn write_with_defaults(
        &mut self,
        address: &str,
        encoding: Encoding,
        message: &str,
        values: Option<&[f64]>,
    ) -> DeviceResult<()> {
        let options = self.write_defaults.clone();
        self.write_to_device(address, encoding, message, values, &options)
    }

    /// History of successful reads from the device at `address`.
    ///
    /// # Errors
    /// [`DeviceError::UnknownAddress`] if nothing is registered.
    pub fn get_data(&self, address: &str) -> DeviceResult<&[Reading]> {
        Ok(self.interface(address)?.retrieved_data())
    }

    /// Unregister the device at `address` and hand its interface back.
    ///
    /// Dropping the returned interface closes its session.
    ///
    /// # Errors
    /// [`DeviceError::UnknownAddress`] if nothing is registered.
    pub fn remove_device_interface(&mut self, address: &str) -> DeviceResult<DeviceInterface> {
        let interface = self
            .devices
            .remove(address)
            .ok_or_else(|| DeviceError::UnknownAddress(address.to_string()))?;
        debug!(address = %address, "Removed device interface");
        Ok(interface)
    }

    /// Whether an interface is registered under `address`.
    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    /// Registered addresses, sorted.
    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        addresses.sort_unstable();
        addresses
    }

    /// Number of registered interfaces.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no interface is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.addresses())
            .field("write_defaults", &self.write_defaults)
            .finish_non_exhaustive()
    }
}
